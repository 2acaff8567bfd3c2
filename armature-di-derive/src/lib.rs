//! Derive macros for armature-di
//!
//! - `#[derive(Injectable)]` - Generate the `Injectable` impl of a struct from
//!   its fields: every `#[inject]` field becomes a constructor parameter, in
//!   declaration order.
//!
//! # Example
//!
//! ```rust,ignore
//! use armature_di::Injectable;
//! use std::sync::Arc;
//!
//! #[derive(Injectable)]
//! struct Database;
//!
//! #[derive(Injectable)]
//! #[injectable(scope = "request")]
//! struct UserService {
//!     #[inject]
//!     db: Arc<Database>,
//!     #[inject(token = "DATABASE_URL")]
//!     url: Arc<String>,
//!     #[inject(optional)]
//!     cache: Option<Arc<Cache>>,
//!     // Non-injected fields use Default
//!     request_count: u64,
//! }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Type, parse_macro_input};

/// Derive macro for the `Injectable` trait.
///
/// # Field attributes
///
/// - `#[inject]` - Inject the provider registered for `T`. The field type must be `Arc<T>`.
/// - `#[inject(token = "NAME")]` - Inject the provider registered under a string token.
/// - `#[inject(optional)]` - Inject `None` when nothing is registered. Uses `Option<Arc<T>>`.
///
/// Fields without `#[inject]` use `Default::default()`.
///
/// # Struct attributes
///
/// - `#[injectable(scope = "default" | "request" | "transient")]`
/// - `#[injectable(durable)]`
#[proc_macro_derive(Injectable, attributes(inject, injectable))]
pub fn derive_injectable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let options = parse_injectable_attrs(&input.attrs)?;

    let construct_body = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => {
                let mut params = Vec::new();
                let mut inits = Vec::new();
                for field in fields.named.iter() {
                    let Some(field_name) = field.ident.as_ref() else {
                        continue;
                    };
                    match parse_inject_attr(&field.attrs)? {
                        Some(inject) => {
                            let index = params.len();
                            let (param, init) = injected_field(&field.ty, &inject, index)?;
                            params.push(param);
                            inits.push(quote! { #field_name: #init });
                        }
                        None => inits.push(quote! {
                            #field_name: ::std::default::Default::default()
                        }),
                    }
                }
                (params, quote! { Ok(Self { #(#inits),* }) })
            }
            Fields::Unit => (Vec::new(), quote! { Ok(Self) }),
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Injectable can only be derived for structs with named fields or unit structs",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Injectable can only be derived for structs",
            ));
        }
    };
    let (params, body) = construct_body;

    let scope = options.scope.map(|scope| {
        let variant = syn::Ident::new(scope.variant(), proc_macro2::Span::call_site());
        quote! { def.scope(::armature_di::Scope::#variant); }
    });
    let durable = options.durable.then(|| quote! { def.durable(); });
    let args = if params.is_empty() {
        quote! { _args }
    } else {
        quote! { args }
    };

    Ok(quote! {
        impl #impl_generics ::armature_di::Injectable for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn define(def: &mut ::armature_di::InjectableDefinition<Self>) {
                #(#params)*
                #scope
                #durable
            }

            fn construct(#args: &mut ::armature_di::Arguments) -> ::armature_di::Result<Self> {
                #body
            }
        }
    })
}

/// `define` statement and `construct` initializer of one injected field
fn injected_field(
    ty: &Type,
    inject: &InjectAttr,
    index: usize,
) -> syn::Result<(proc_macro2::TokenStream, proc_macro2::TokenStream)> {
    let inner = if inject.optional {
        extract_option_arc_inner_type(ty).ok_or_else(|| {
            syn::Error::new_spanned(
                ty,
                "Fields marked with #[inject(optional)] must have type Option<Arc<T>>",
            )
        })?
    } else {
        extract_arc_inner_type(ty).ok_or_else(|| {
            syn::Error::new_spanned(ty, "Fields marked with #[inject] must have type Arc<T>")
        })?
    };

    let mut param = match &inject.token {
        Some(token) => quote! { def.param_token(#token); },
        None => quote! { def.param::<#inner>(); },
    };
    let init = if inject.optional {
        param.extend(quote! { def.optional(#index); });
        quote! { args.next_optional::<#inner>()? }
    } else {
        quote! { args.next::<#inner>()? }
    };
    Ok((param, init))
}

#[derive(Default)]
struct InjectAttr {
    optional: bool,
    token: Option<LitStr>,
}

/// Find and parse the #[inject] attribute
fn parse_inject_attr(attrs: &[Attribute]) -> syn::Result<Option<InjectAttr>> {
    let Some(attr) = attrs.iter().find(|attr| attr.path().is_ident("inject")) else {
        return Ok(None);
    };
    let mut inject = InjectAttr::default();
    if attr.meta.require_path_only().is_ok() {
        return Ok(Some(inject));
    }
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("optional") {
            inject.optional = true;
            Ok(())
        } else if meta.path.is_ident("token") {
            inject.token = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("expected `optional` or `token = \"...\"`"))
        }
    })?;
    Ok(Some(inject))
}

enum ScopeAttr {
    Default,
    Request,
    Transient,
}

impl ScopeAttr {
    fn variant(&self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Request => "Request",
            Self::Transient => "Transient",
        }
    }
}

#[derive(Default)]
struct InjectableAttrs {
    scope: Option<ScopeAttr>,
    durable: bool,
}

/// Parse every #[injectable(...)] attribute on the struct
fn parse_injectable_attrs(attrs: &[Attribute]) -> syn::Result<InjectableAttrs> {
    let mut options = InjectableAttrs::default();
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("injectable")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("durable") {
                options.durable = true;
                return Ok(());
            }
            if meta.path.is_ident("scope") {
                let value: LitStr = meta.value()?.parse()?;
                options.scope = Some(match value.value().to_ascii_lowercase().as_str() {
                    "default" | "singleton" => ScopeAttr::Default,
                    "request" => ScopeAttr::Request,
                    "transient" => ScopeAttr::Transient,
                    _ => {
                        return Err(syn::Error::new_spanned(
                            &value,
                            "scope must be \"default\", \"request\" or \"transient\"",
                        ));
                    }
                });
                return Ok(());
            }
            Err(meta.error("expected `scope = \"...\"` or `durable`"))
        })?;
    }
    Ok(options)
}

/// Extract T from Arc<T>
fn extract_arc_inner_type(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        let segment = type_path.path.segments.last()?;
        if segment.ident == "Arc" {
            if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                    return Some(inner);
                }
            }
        }
    }
    None
}

/// Extract T from Option<Arc<T>>
fn extract_option_arc_inner_type(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        let segment = type_path.path.segments.last()?;
        if segment.ident == "Option" {
            if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                    return extract_arc_inner_type(inner);
                }
            }
        }
    }
    None
}
