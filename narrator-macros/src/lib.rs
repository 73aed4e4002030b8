//! Proc macros for narrator tool arguments.
//!
//! `#[derive(Tool)]` turns a typed argument struct into an entry of the
//! tool registry: it implements `narrator_core::tools::ToolArgs`, giving the
//! tool name, the description (from doc comments) and the JSON schema the
//! oracle sees when it proposes tool calls.
//!
//! # Example
//!
//! ```ignore
//! /// Search the lore index.
//! #[derive(Tool, Deserialize)]
//! #[tool(name = "query_lore", read_only)]
//! struct QueryLore {
//!     /// Free-text search
//!     query: String,
//!     /// Maximum number of records
//!     limit: Option<u32>,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, DeriveInput, Field, Lit, LitStr, Meta, Token, Type};

/// Derive `ToolArgs` for a struct with named fields.
///
/// # Attributes
///
/// - `#[tool(name = "...")]` on the struct: registry name (defaults to snake_case struct name)
/// - `#[tool(read_only)]` on the struct: the tool never writes durable state
/// - `#[tool(rename = "...")]` on a field: property name in the schema
/// - `#[tool(optional)]` on a field: not listed in `required`
/// - `#[tool(one_of = "a|b|c")]` on a string field: closed set of values
///
/// `Option<T>` fields and fields carrying `#[serde(default)]` are optional.
#[proc_macro_derive(Tool, attributes(tool))]
pub fn derive_tool(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_tool(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

#[derive(Default)]
struct ToolOptions {
    name: Option<String>,
    read_only: bool,
}

#[derive(Default)]
struct FieldOptions {
    rename: Option<String>,
    optional: bool,
    one_of: Vec<String>,
}

fn expand_tool(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let options = tool_options(&input.attrs)?;
    let tool_name = options
        .name
        .unwrap_or_else(|| to_snake_case(&struct_name.to_string()));
    let read_only = options.read_only;
    let description = doc_comment(&input.attrs);

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => named.named.iter().collect::<Vec<_>>(),
            syn::Fields::Unit => Vec::new(),
            syn::Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    &input.ident,
                    "Tool derive needs named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Tool derive only supports structs",
            ))
        }
    };

    let mut property_tokens = Vec::new();
    let mut required_fields = Vec::new();

    for field in fields {
        let field_options = field_options(field)?;
        let property_name = match field_options.rename {
            Some(ref name) => name.clone(),
            None => field
                .ident
                .as_ref()
                .map(|i| i.to_string())
                .ok_or_else(|| syn::Error::new_spanned(field, "field needs a name"))?,
        };

        let base_schema = type_schema(&field.ty);
        let desc = doc_comment(&field.attrs);
        let desc_token = if desc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = ::serde_json::json!(#desc); }
        };
        let one_of = &field_options.one_of;
        let enum_token = if one_of.is_empty() {
            quote! {}
        } else {
            quote! { property["enum"] = ::serde_json::json!([#(#one_of),*]); }
        };

        property_tokens.push(quote! {
            {
                let mut property = #base_schema;
                #desc_token
                #enum_token
                properties.insert(#property_name.to_string(), property);
            }
        });

        let optional = field_options.optional || is_option(&field.ty) || has_serde_default(field);
        if !optional {
            required_fields.push(property_name);
        }
    }

    Ok(quote! {
        impl ::narrator_core::tools::ToolArgs for #struct_name {
            const NAME: &'static str = #tool_name;
            const READ_ONLY: bool = #read_only;

            fn description() -> &'static str {
                #description
            }

            fn input_schema() -> ::serde_json::Value {
                let mut properties = ::serde_json::Map::new();
                #(#property_tokens)*
                let required: ::std::vec::Vec<&str> = ::std::vec![#(#required_fields),*];
                ::serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required
                })
            }
        }
    })
}

fn tool_options(attrs: &[Attribute]) -> syn::Result<ToolOptions> {
    let mut options = ToolOptions::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("tool")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                options.name = Some(lit.value());
                Ok(())
            } else if meta.path.is_ident("read_only") {
                options.read_only = true;
                Ok(())
            } else {
                Err(meta.error("expected `name = \"...\"` or `read_only`"))
            }
        })?;
    }
    Ok(options)
}

fn field_options(field: &Field) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("tool")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                let lit: LitStr = meta.value()?.parse()?;
                options.rename = Some(lit.value());
                Ok(())
            } else if meta.path.is_ident("optional") {
                options.optional = true;
                Ok(())
            } else if meta.path.is_ident("one_of") {
                let lit: LitStr = meta.value()?.parse()?;
                options.one_of = lit
                    .value()
                    .split('|')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
                Ok(())
            } else {
                Err(meta.error("expected `rename`, `optional` or `one_of`"))
            }
        })?;
    }
    Ok(options)
}

fn has_serde_default(field: &Field) -> bool {
    let mut found = false;
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("serde")) {
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("default") {
                found = true;
            }
            if meta.input.peek(Token![=]) {
                let _: syn::Expr = meta.value()?.parse()?;
            }
            Ok(())
        });
    }
    found
}

fn doc_comment(attrs: &[Attribute]) -> String {
    attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .filter_map(|attr| match &attr.meta {
            Meta::NameValue(nv) => match &nv.value {
                syn::Expr::Lit(expr_lit) => match &expr_lit.lit {
                    Lit::Str(s) => Some(s.value().trim().to_string()),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(type_path) => type_path.path.segments.last(),
        _ => None,
    }
}

fn first_generic(segment: &syn::PathSegment) -> Option<&Type> {
    if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
        if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
            return Some(inner);
        }
    }
    None
}

fn is_option(ty: &Type) -> bool {
    last_segment(ty).is_some_and(|s| s.ident == "Option")
}

fn type_schema(ty: &Type) -> TokenStream2 {
    let Some(segment) = last_segment(ty) else {
        return quote! { ::serde_json::json!({}) };
    };

    match segment.ident.to_string().as_str() {
        "String" | "str" => quote! { ::serde_json::json!({"type": "string"}) },
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { ::serde_json::json!({"type": "integer"}) }
        }
        "f32" | "f64" => quote! { ::serde_json::json!({"type": "number"}) },
        "bool" => quote! { ::serde_json::json!({"type": "boolean"}) },
        "Option" => match first_generic(segment) {
            Some(inner) => type_schema(inner),
            None => quote! { ::serde_json::json!({}) },
        },
        "Vec" => match first_generic(segment) {
            Some(inner) => {
                let items = type_schema(inner);
                quote! { ::serde_json::json!({"type": "array", "items": #items}) }
            }
            None => quote! { ::serde_json::json!({"type": "array"}) },
        },
        // serde_json::Value and nested structs are free-form objects.
        _ => quote! { ::serde_json::json!({"type": "object"}) },
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
