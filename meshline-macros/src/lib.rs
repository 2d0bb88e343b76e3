//! Proc macros for the meshline test harness
//!
//! Provides the `#[meshline::test]` attribute macro for multi-cluster tests.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{Expr, ExprLit, FnArg, ItemFn, Lit, MetaNameValue, Pat, PatType, ReturnType, Token};

/// Attribute macro for multi-cluster integration tests.
///
/// Declares the clusters the test needs, builds the topology from the
/// environment and injects it as `topology`. When the environment does not
/// have enough clusters the test prints why and returns without failing.
///
/// Whether the body returns, fails or panics, every namespace the test
/// created is deleted afterwards (unless `MESHLINE_KEEP_ALL` is set) and the
/// panic, if any, is re-raised.
///
/// # Example
///
/// ```ignore
/// use meshline::Topology;
///
/// #[meshline::test(public = 1, private = 1, namespace = "echo")]
/// async fn test_echo(topology: Topology) {
///     let public = topology.public(1).unwrap();
///     assert_eq!(public.namespace, "public-echo-1");
/// }
/// ```
///
/// # Arguments
///
/// - `public = N` - public clusters needed (default 0)
/// - `private = N` - private clusters needed (default 0)
/// - `namespace = "id"` - namespace seed (default: the function name with
///   `_` replaced by `-`)
///
/// # With Result Return Type
///
/// ```ignore
/// #[meshline::test(public = 1)]
/// async fn test_with_result(topology: Topology) -> Result<(), Box<dyn std::error::Error>> {
///     topology.public(1)?.create_namespace().await?;
///     Ok(())
/// }
/// ```
///
/// # Environment Variables
///
/// Credentials and settings come from `Planner::from_env`, e.g.
/// `MESHLINE_PUBLIC_KUBECONFIGS`, `MESHLINE_PRIVATE_KUBECONFIGS`,
/// `MESHLINE_ASSIGNMENT`.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = syn::parse_macro_input!(item as ItemFn);
    let args = match Punctuated::<MetaNameValue, Token![,]>::parse_terminated
        .parse(attr)
        .and_then(|pairs| parse_args(&pairs))
    {
        Ok(args) => args,
        Err(e) => return e.to_compile_error().into(),
    };
    test_impl(&args, &input_fn).into()
}

/// Parsed `#[meshline::test(...)]` arguments
#[derive(Debug, Default, PartialEq, Eq)]
struct TestArgs {
    public: usize,
    private: usize,
    namespace: Option<String>,
}

fn parse_args(pairs: &Punctuated<MetaNameValue, Token![,]>) -> syn::Result<TestArgs> {
    let mut args = TestArgs::default();

    for pair in pairs {
        let key = pair
            .path
            .get_ident()
            .map(ToString::to_string)
            .unwrap_or_default();
        let Expr::Lit(ExprLit { lit, .. }) = &pair.value else {
            return Err(syn::Error::new_spanned(&pair.value, "expected a literal"));
        };

        match (key.as_str(), lit) {
            ("public", Lit::Int(n)) => args.public = n.base10_parse()?,
            ("private", Lit::Int(n)) => args.private = n.base10_parse()?,
            ("namespace", Lit::Str(s)) => args.namespace = Some(s.value()),
            ("public" | "private", other) => {
                return Err(syn::Error::new_spanned(other, "expected an integer"));
            }
            ("namespace", other) => {
                return Err(syn::Error::new_spanned(other, "expected a string"));
            }
            _ => {
                return Err(syn::Error::new_spanned(
                    &pair.path,
                    "unknown argument, expected `public`, `private` or `namespace`",
                ));
            }
        }
    }

    Ok(args)
}

/// Check if a function has a parameter named "topology"
fn has_topology_param(input_fn: &ItemFn) -> bool {
    input_fn.sig.inputs.iter().any(|arg| {
        if let FnArg::Typed(PatType { pat, .. }) = arg {
            if let Pat::Ident(ident) = pat.as_ref() {
                return ident.ident == "topology";
            }
        }
        false
    })
}

/// Check if a function has an explicit return type (e.g., `-> Result<...>`)
fn has_result_return(input_fn: &ItemFn) -> bool {
    matches!(&input_fn.sig.output, ReturnType::Type(..))
}

/// Inner implementation that works with `proc_macro2` types for testability
fn test_impl(args: &TestArgs, input_fn: &ItemFn) -> proc_macro2::TokenStream {
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;
    let fn_inputs = &input_fn.sig.inputs;
    let fn_output = &input_fn.sig.output;

    if !has_topology_param(input_fn) {
        // No topology parameter - just wrap with tokio::test
        return quote! {
            #(#fn_attrs)*
            #[tokio::test]
            #fn_vis async fn #fn_name() #fn_output {
                #fn_block
            }
        };
    }

    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| fn_name.to_string().replace('_', "-"));
    let public = args.public;
    let private = args.private;
    let inner = format_ident!("__meshline_{}", fn_name);
    let skipped = if has_result_return(input_fn) {
        quote! { return Ok(()); }
    } else {
        quote! { return; }
    };

    quote! {
        #(#fn_attrs)*
        #[tokio::test]
        #fn_vis async fn #fn_name() #fn_output {
            async fn #inner(#fn_inputs) #fn_output #fn_block

            ::meshline::telemetry::init_logging();

            let needs = ::meshline::topology::ClusterNeeds::new(#namespace)
                .public(#public)
                .private(#private);
            let planner = ::meshline::topology::Planner::from_env()
                .unwrap_or_else(|e| panic!("invalid meshline configuration: {}", e));

            let topology = match planner.build(&needs).await {
                Ok(::meshline::topology::Plan::Ready(topology)) => topology,
                Ok(::meshline::topology::Plan::Skip(reason)) => {
                    eprintln!("[meshline] skipping {}: {}", stringify!(#fn_name), reason);
                    #skipped
                }
                Err(e) => panic!("failed to build topology: {}", e),
            };
            let config = planner.config().clone();
            let guard = topology.clone();

            // Namespaces go away even when the test body panics
            let outcome = ::meshline::__macro_support::FutureExt::catch_unwind(
                ::std::panic::AssertUnwindSafe(#inner(topology)),
            )
            .await;

            if config.keep_namespaces {
                let kept: Vec<_> = guard.iter().map(|ctx| ctx.namespace.clone()).collect();
                eprintln!("[meshline] MESHLINE_KEEP_ALL set - keeping namespaces: {:?}", kept);
            } else {
                for warning in
                    ::meshline::lifecycle::teardown_namespaces(&guard, config.teardown_timeout).await
                {
                    eprintln!("[meshline] Warning: teardown: {}", warning);
                }
            }

            match outcome {
                Ok(result) => result,
                Err(panic) => ::std::panic::resume_unwind(panic),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{has_result_return, has_topology_param, parse_args, test_impl, TestArgs};
    use syn::parse::Parser;
    use syn::punctuated::Punctuated;
    use syn::{ItemFn, MetaNameValue, Token};

    fn parse_fn(code: &str) -> ItemFn {
        syn::parse_str(code).expect("Failed to parse test function")
    }

    fn args(code: &str) -> syn::Result<TestArgs> {
        let pairs = Punctuated::<MetaNameValue, Token![,]>::parse_terminated
            .parse_str(code)
            .expect("Failed to parse arguments");
        parse_args(&pairs)
    }

    #[test]
    fn test_parse_args_all_keys() {
        let parsed = args(r#"public = 1, private = 2, namespace = "echo""#).unwrap();
        assert_eq!(
            parsed,
            TestArgs {
                public: 1,
                private: 2,
                namespace: Some("echo".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_args_defaults() {
        assert_eq!(args("").unwrap(), TestArgs::default());
    }

    #[test]
    fn test_parse_args_rejects_unknown_and_mistyped() {
        assert!(args("clusters = 2").is_err());
        assert!(args(r#"public = "one""#).is_err());
        assert!(args("namespace = 3").is_err());
    }

    #[test]
    fn test_has_topology_param() {
        assert!(has_topology_param(&parse_fn(
            "async fn test_it(topology: Topology) {}"
        )));
        assert!(!has_topology_param(&parse_fn("async fn test_it() {}")));
        assert!(
            !has_topology_param(&parse_fn("async fn test_it(topo: Topology) {}")),
            "Only 'topology' name should match"
        );
    }

    #[test]
    fn test_has_result_return() {
        let f = parse_fn(
            "async fn test_it(topology: Topology) -> Result<(), Box<dyn std::error::Error>> {}",
        );
        assert!(has_result_return(&f));
        assert!(!has_result_return(&parse_fn(
            "async fn test_it(topology: Topology) {}"
        )));
    }

    #[test]
    fn test_impl_with_topology_builds_plan() {
        let f = parse_fn("async fn test_echo(topology: Topology) { topology.public(1).unwrap(); }");
        let parsed = args("public = 1, private = 1").unwrap();
        let output = test_impl(&parsed, &f).to_string();

        assert!(output.contains("tokio :: test"), "Should have tokio::test");
        assert!(output.contains("Planner :: from_env"), "Should build from env");
        assert!(output.contains("\"test-echo\""), "Should derive namespace from name");
        assert!(output.contains("Plan :: Skip"), "Should handle skips");
        assert!(output.contains("__meshline_test_echo"), "Should call inner fn");
    }

    #[test]
    fn test_impl_tears_down_after_panic() {
        let f = parse_fn("async fn test_echo(topology: Topology) { panic!(\"boom\"); }");
        let output = test_impl(&TestArgs::default(), &f).to_string();

        assert!(output.contains("catch_unwind"), "Should wrap with catch_unwind");
        assert!(
            output.contains("lifecycle :: teardown_namespaces"),
            "Should delete namespaces"
        );
        assert!(output.contains("teardown_timeout"), "Should use the configured bound");
        assert!(output.contains("keep_namespaces"), "Should honor keep mode");
        assert!(output.contains("resume_unwind"), "Should re-raise the panic");

        let teardown = output.find("teardown_namespaces").unwrap();
        let reraise = output.find("resume_unwind").unwrap();
        assert!(teardown < reraise, "Should tear down before re-raising");
    }

    #[test]
    fn test_impl_without_topology_has_no_teardown() {
        let f = parse_fn("async fn test_simple() { assert!(true); }");
        let output = test_impl(&TestArgs::default(), &f).to_string();
        assert!(!output.contains("catch_unwind"));
        assert!(!output.contains("teardown_namespaces"));
    }

    #[test]
    fn test_impl_with_result_returns_ok_on_skip() {
        let f = parse_fn(
            "async fn test_it(topology: Topology) -> Result<(), Box<dyn std::error::Error>> { Ok(()) }",
        );
        let output = test_impl(&TestArgs::default(), &f).to_string();
        assert!(output.contains("return Ok (())"), "Should return Ok on skip");
    }

    #[test]
    fn test_impl_without_topology_generates_simple_wrapper() {
        let f = parse_fn("async fn test_simple() { assert!(true); }");
        let output = test_impl(&TestArgs::default(), &f).to_string();

        assert!(output.contains("tokio :: test"), "Should have tokio::test");
        assert!(
            !output.contains("Planner"),
            "Should NOT build a topology without topology param"
        );
    }

    #[test]
    fn test_impl_preserves_function_name() {
        let f = parse_fn("async fn my_custom_test(topology: Topology) {}");
        let output = test_impl(&TestArgs::default(), &f).to_string();

        assert!(
            output.contains("my_custom_test"),
            "Should preserve function name"
        );
    }
}
