//! Test attributes that fail a test instead of letting it hang.
//!
//! `#[timeout]` wraps a synchronous test; `#[tokio_timeout_test]` wraps an async one in
//! its own runtime. Both accept a bare number of seconds (`#[timeout(5)]`) or named
//! arguments (`#[tokio_timeout_test(secs = 5, flavor = "multi_thread")]`).

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, ExprLit, ItemFn, Lit, LitInt, MetaNameValue, Token};

const DEFAULT_SECS: u64 = 30;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flavor {
    CurrentThread,
    MultiThread,
}

struct Options {
    secs: u64,
    flavor: Flavor,
}

fn parse_options(attr: TokenStream) -> syn::Result<Options> {
    let mut options = Options {
        secs: DEFAULT_SECS,
        flavor: Flavor::CurrentThread,
    };
    if attr.is_empty() {
        return Ok(options);
    }

    if let Ok(lit) = syn::parse::<LitInt>(attr.clone()) {
        options.secs = positive_secs(&lit)?;
        return Ok(options);
    }

    let args = Punctuated::<MetaNameValue, Token![,]>::parse_terminated.parse(attr)?;
    for arg in args {
        let Expr::Lit(ExprLit { lit, .. }) = &arg.value else {
            return Err(syn::Error::new_spanned(&arg.value, "expected a literal"));
        };
        match (arg.path.get_ident().map(|ident| ident.to_string()).as_deref(), lit) {
            (Some("secs"), Lit::Int(lit)) => options.secs = positive_secs(lit)?,
            (Some("flavor"), Lit::Str(lit)) => {
                options.flavor = match lit.value().as_str() {
                    "current_thread" => Flavor::CurrentThread,
                    "multi_thread" => Flavor::MultiThread,
                    _ => {
                        return Err(syn::Error::new_spanned(
                            lit,
                            "flavor must be \"current_thread\" or \"multi_thread\"",
                        ))
                    }
                }
            }
            _ => {
                return Err(syn::Error::new_spanned(
                    &arg,
                    "expected `secs = <int>` or `flavor = \"...\"`",
                ))
            }
        }
    }
    Ok(options)
}

fn positive_secs(lit: &LitInt) -> syn::Result<u64> {
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(secs)
}

fn path_is(attr: &Attribute, expected: &[&str]) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    segments.iter().map(String::as_str).eq(expected.iter().copied())
}

/// Runs `body` on a worker thread and panics if it does not report back in time.
fn with_deadline(secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let __deadline = ::std::time::Duration::from_secs(#secs);
        let (__tx, __rx) = ::std::sync::mpsc::channel();
        ::std::thread::spawn(move || {
            let outcome = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| { #body }));
            let _ = __tx.send(outcome);
        });
        match __rx.recv_timeout(__deadline) {
            Ok(Ok(_)) => {}
            Ok(Err(payload)) => ::std::panic::resume_unwind(payload),
            Err(::std::sync::mpsc::RecvTimeoutError::Timeout) => {
                panic!("test exceeded its {}s deadline", #secs)
            }
            Err(::std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                panic!("test thread exited without reporting a result")
            }
        }
    }
}

fn expand(attr: TokenStream, item: TokenStream, asynchronous: bool) -> TokenStream {
    let options = match parse_options(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = match syn::parse::<ItemFn>(item) {
        Ok(item) => item,
        Err(err) => return err.to_compile_error().into(),
    };

    if sig.asyncness.is_some() != asynchronous {
        let message = if asynchronous {
            "tokio_timeout_test expects an async fn"
        } else {
            "timeout expects a synchronous fn; use tokio_timeout_test for async tests"
        };
        return syn::Error::new_spanned(&sig.ident, message)
            .to_compile_error()
            .into();
    }
    sig.asyncness = None;

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !path_is(attr, &["test"]) && !path_is(attr, &["tokio", "test"]))
        .collect();

    let body = if asynchronous {
        let secs = options.secs;
        let builder = match options.flavor {
            Flavor::CurrentThread => quote!(::tokio::runtime::Builder::new_current_thread()),
            Flavor::MultiThread => quote!(::tokio::runtime::Builder::new_multi_thread()),
        };
        quote! {
            let runtime = #builder
                .enable_all()
                .build()
                .expect("failed to build test runtime");
            runtime.block_on(async {
                ::tokio::time::timeout(::std::time::Duration::from_secs(#secs), async move #block)
                    .await
                    .expect("test exceeded its deadline");
            });
        }
    } else {
        quote!(#block;)
    };
    let guarded = with_deadline(options.secs, body);

    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #guarded
        }
    }
    .into()
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, true)
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, false)
}
