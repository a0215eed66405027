//! Attribute macro generating the `Remotable` dispatch table.

use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, FnArg, ImplItem, ImplItemFn, ItemImpl,
    Path, Visibility,
};

/// Implements `roving::Remotable` for the type of an inherent impl block.
///
/// Every `pub fn name(&self, args: &[u8]) -> Result<Vec<u8>, E>` becomes the
/// selector `"name"`. `E` must convert into `roving::InvokeError`. Private
/// methods are left alone; public methods of any other shape are rejected.
///
/// ```ignore
/// use roving::{remote_methods, InvokeError};
///
/// struct Greeter;
///
/// #[remote_methods]
/// impl Greeter {
///     pub fn hello(&self, _args: &[u8]) -> Result<Vec<u8>, InvokeError> {
///         Ok(b"hi".to_vec())
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn remote_methods(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let mut roving: Path = parse_quote!(::roving);
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("crate") {
            roving = meta.value()?.parse()?;
            Ok(())
        } else {
            Err(meta.error("unsupported attribute"))
        }
    });
    parse_macro_input!(args with parser);

    let input = parse_macro_input!(item as ItemImpl);
    match expand(&roving, &input) {
        Ok(generated) => generated.into(),
        Err(err) => err.into_compile_error().into(),
    }
}

fn expand(roving: &Path, input: &ItemImpl) -> syn::Result<TokenStream> {
    if let Some((_, path, _)) = &input.trait_ {
        return Err(syn::Error::new_spanned(
            path,
            "#[remote_methods] must be placed on an inherent impl block",
        ));
    }

    let mut arms = Vec::new();
    for item in &input.items {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        if !matches!(method.vis, Visibility::Public(_)) {
            continue;
        }
        check_signature(method)?;
        let ident = &method.sig.ident;
        let selector = ident.to_string();
        arms.push(quote_spanned! {method.sig.span() =>
            #selector => Self::#ident(self, args).map_err(::core::convert::Into::into),
        });
    }

    let self_ty = &input.self_ty;
    let (impl_generics, _, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        #input

        impl #impl_generics #roving::Remotable for #self_ty #where_clause {
            #[allow(unused_variables)]
            fn invoke(
                &self,
                selector: &str,
                args: &[u8],
            ) -> ::core::result::Result<::std::vec::Vec<u8>, #roving::InvokeError> {
                match selector {
                    #(#arms)*
                    other => ::core::result::Result::Err(
                        #roving::InvokeError::UnknownSelector(::std::string::ToString::to_string(other)),
                    ),
                }
            }

            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }
        }
    })
}

fn check_signature(method: &ImplItemFn) -> syn::Result<()> {
    let sig = &method.sig;
    if sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            sig.asyncness,
            "remote methods cannot be async",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "remote methods cannot be generic",
        ));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        Some(other) => {
            return Err(syn::Error::new_spanned(
                other,
                "remote methods must take `&self`",
            ))
        }
        None => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "remote methods must take `&self`",
            ))
        }
    }

    match (inputs.next(), inputs.next()) {
        (Some(FnArg::Typed(_)), None) => Ok(()),
        _ => Err(syn::Error::new_spanned(
            &sig.inputs,
            "remote methods take exactly one argument: the encoded `&[u8]` arguments",
        )),
    }
}
