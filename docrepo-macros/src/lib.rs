//! Procedural macros for the docrepo project.
//!
//! This crate provides compile-time code generation for the docrepo framework,
//! currently the `Entity` derive.

#[allow(unused_extern_crates)]
extern crate self as docrepo_macros;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Field, Fields, LitStr};

/// Derives `docrepo::document::Entity` for a struct with named fields.
///
/// The identifier is the field marked `#[entity(id)]`, or the field named
/// `id`. `#[entity(collection = "...")]` on the struct overrides the
/// resolved collection name.
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
/// #[entity(collection = "people")]
/// pub struct Person {
///     #[entity(id)]
///     pub key: String,
///     pub name: String,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand_entity(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_entity(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let collection = collection_override(input)?;
    let id_field = id_field(input)?;
    let id_ident = &id_field.ident;
    let id_type = &id_field.ty;

    let collection_fn = collection.map(|collection| {
        quote! {
            fn collection_name() -> ::std::option::Option<&'static str> {
                ::std::option::Option::Some(#collection)
            }
        }
    });

    Ok(quote! {
        impl #impl_generics ::docrepo::document::Entity for #name #ty_generics #where_clause {
            type Key = #id_type;

            fn id(&self) -> &Self::Key {
                &self.#id_ident
            }

            fn set_id(&mut self, id: Self::Key) {
                self.#id_ident = id;
            }

            #collection_fn
        }
    })
}

fn collection_override(input: &DeriveInput) -> syn::Result<Option<LitStr>> {
    let mut collection = None;

    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().trim().is_empty() {
                    return Err(syn::Error::new_spanned(&value, "collection name must not be blank"));
                }
                collection = Some(value);
                Ok(())
            } else {
                Err(meta.error("unsupported entity attribute, expected `collection`"))
            }
        })?;
    }

    Ok(collection)
}

fn id_field(input: &DeriveInput) -> syn::Result<&Field> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(&input.ident, "Entity can only be derived for structs"));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(&input.ident, "Entity requires named fields"));
    };

    let mut marked = Vec::new();
    for field in &fields.named {
        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("entity")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    marked.push(field);
                    Ok(())
                } else {
                    Err(meta.error("unsupported entity field attribute, expected `id`"))
                }
            })?;
        }
    }

    match marked.as_slice() {
        [field] => Ok(*field),
        [] => fields
            .named
            .iter()
            .find(|field| field.ident.as_ref().is_some_and(|ident| ident == "id"))
            .ok_or_else(|| {
                syn::Error::new_spanned(
                    &input.ident,
                    "no identifier field: add a field named `id` or mark one with #[entity(id)]",
                )
            }),
        [_, second, ..] => Err(syn::Error::new_spanned(second, "only one field can be marked #[entity(id)]")),
    }
}
