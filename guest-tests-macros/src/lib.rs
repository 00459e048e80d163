//! `#[guest_test]`: registers a test function's pointer and name into
//! the `.guest_tests` linker section so the in-guest runner
//! (`guest_tests::run`) can enumerate and invoke them without a host
//! present to drive individual `#[test]` functions.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Error, ItemFn, LitStr, ReturnType, parse_macro_input};

#[proc_macro_attribute]
pub fn guest_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut name: Option<LitStr> = None;

    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("name") {
            let lit: LitStr = meta.value()?.parse()?;
            name = Some(lit);
            return Ok(());
        }
        Err(meta.error("expected `name`"))
    });

    parse_macro_input!(args with parser);
    let input_fn = parse_macro_input!(input as ItemFn);

    if !input_fn.sig.inputs.is_empty() {
        return Error::new_spanned(
            &input_fn.sig.inputs,
            "guest test function must not accept arguments",
        )
        .to_compile_error()
        .into();
    }

    if !input_fn.sig.generics.params.is_empty() {
        return Error::new_spanned(
            &input_fn.sig.generics.params,
            "guest test function must not have generics",
        )
        .to_compile_error()
        .into();
    }

    if input_fn.sig.asyncness.is_some() {
        return Error::new_spanned(&input_fn.sig.ident, "guest test function must not be async")
            .to_compile_error()
            .into();
    }

    if !matches!(input_fn.sig.output, ReturnType::Default) {
        return Error::new_spanned(&input_fn.sig.output, "guest test function must return ()")
            .to_compile_error()
            .into();
    }

    let ident = &input_fn.sig.ident;
    let name = name.unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span()));
    let registration = format_ident!("__GUEST_TEST_REGISTRATION_{}", ident);
    let shim = format_ident!("__guest_test_shim_{}", ident);

    quote! {
        #input_fn

        #[allow(non_snake_case)]
        extern "C" fn #shim() {
            #ident();
        }

        #[allow(non_upper_case_globals)]
        #[used]
        #[cfg_attr(target_os = "none", unsafe(link_section = ".guest_tests"))]
        static #registration: ::guest_tests::TestRegistration = ::guest_tests::TestRegistration {
            name: ::guest_tests::TestName::new(#name),
            run: #shim,
        };
    }
    .into()
}
