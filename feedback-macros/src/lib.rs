//! Procedural macros for feedback-rs.
//!
//! This crate provides the `#[feedback_rs::test]` attribute macro for writing
//! tests that run feedback loops within a `FeedbackRuntime`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{parse_macro_input, ItemFn, LitInt, LitStr};

/// Runtime settings for one test, parsed from the attribute arguments.
struct TestConfig {
    tokio_threads: usize,
    rayon_threads: usize,
    prefix: Option<LitStr>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            tokio_threads: 1,
            rayon_threads: 2,
            prefix: None,
        }
    }
}

impl TestConfig {
    fn parse_meta(&mut self, meta: ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("tokio_thread_count") {
            self.tokio_threads = meta.value()?.parse::<LitInt>()?.base10_parse()?;
        } else if meta.path.is_ident("rayon_thread_count") {
            self.rayon_threads = meta.value()?.parse::<LitInt>()?.base10_parse()?;
        } else if meta.path.is_ident("prefix") {
            self.prefix = Some(meta.value()?.parse()?);
        } else {
            return Err(meta.error(
                "unknown attribute, expected `tokio_thread_count`, `rayon_thread_count` or `prefix`",
            ));
        }
        Ok(())
    }
}

/// Runs an async test inside a fresh `FeedbackRuntime`.
///
/// The body runs through `block_on`, so `feedback_rs::current_runtime()` is
/// available and `runtime.scheduler()` can drive loops. Loops whose state
/// streams are dropped by the body are torn down by the runtime; the test
/// waits for that with `block_until_idle` and then fails if a loop recording
/// into the runtime's metrics is still active.
///
/// The body may return `Result`, in which case `?` works as in a plain test.
///
/// # Attributes
///
/// - `tokio_thread_count = N`: tokio worker threads (default 1)
/// - `rayon_thread_count = N`: rayon threads for compute effects (default 2)
/// - `prefix = "name"`: thread name prefix (default `test-{fn_name}`)
///
/// # Examples
///
/// ```ignore
/// #[feedback_rs::test]
/// async fn test_counter_loop() {
///     let runtime = feedback_rs::current_runtime().unwrap();
///     let mut states = counter_system().run(runtime.scheduler());
///     assert_eq!(states.next().await.unwrap().unwrap(), 0);
/// }
///
/// #[feedback_rs::test(tokio_thread_count = 2, rayon_thread_count = 4)]
/// async fn test_compute_effects() -> Result<(), BoxError> {
///     // ...
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut config = TestConfig::default();
    let parser = syn::meta::parser(|meta| config.parse_meta(meta));
    parse_macro_input!(attr with parser);

    let input = parse_macro_input!(item as ItemFn);
    generate_test(input, config)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn generate_test(input: ItemFn, config: TestConfig) -> syn::Result<TokenStream2> {
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    if sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            sig.fn_token,
            "feedback tests must be async",
        ));
    }
    if !sig.inputs.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "feedback tests take no arguments",
        ));
    }

    let fn_name = &sig.ident;
    let output_ty = &sig.output;
    let TestConfig {
        tokio_threads,
        rayon_threads,
        prefix,
    } = config;
    let prefix = match prefix {
        Some(prefix) => quote!(#prefix),
        None => quote!(concat!("test-", stringify!(#fn_name))),
    };

    let mut test_sig = sig.clone();
    test_sig.asyncness = None;

    // The body stays an async fn so `?` sees the declared return type.
    Ok(quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis #test_sig {
            let __feedback_runtime = ::feedback_rs::FeedbackBuilder::new()
                .prefix(#prefix)
                .tokio_threads(#tokio_threads)
                .rayon_threads(#rayon_threads)
                .build()
                .expect("failed to create test runtime");

            async fn __feedback_test_body() #output_ty #block

            let __feedback_result = __feedback_runtime.block_on(__feedback_test_body());
            __feedback_runtime.block_until_idle();
            assert_eq!(
                __feedback_runtime.metrics().active_loops.get(),
                0,
                "a feedback loop outlived the test"
            );
            __feedback_result
        }
    })
}
