//! Derive macro for pdf-hunter-core structured LLM output contracts.
//!
//! This crate provides `#[derive(Structured)]`, implementing the
//! `pdf_hunter_core::llm::schema::StructuredSchema` trait on a struct so the
//! LLM Gateway's `complete_structured::<T>` can force a single tool call
//! shaped like `T` and validate the model's JSON against `T`'s field list
//! before deserializing it.
//!
//! # Example
//!
//! ```ignore
//! use pdf_hunter_derive::Structured;
//!
//! #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Structured)]
//! #[structured(name = "triage_result")]
//! struct TriageResult {
//!     decision: TriageDecision,
//!     reasoning: String,
//!     #[structured(optional)]
//!     notes: Option<String>,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Error, Fields, LitStr, Type};

/// Derive macro implementing `StructuredSchema` for a struct.
///
/// # Attributes
///
/// - `#[structured(name = "...")]` (struct-level) — overrides the schema
///   name (the tool name the gateway forces a call to). Defaults to the
///   struct's name converted to `snake_case`.
/// - `#[structured(optional)]` (field-level) — marks a field optional in
///   addition to whatever `Option<T>` already infers.
/// - `#[structured(string|integer|float|bool|array|object)]` (field-level)
///   — overrides the inferred `FieldType` for fields whose Rust type isn't
///   one of the primitives this macro can read off directly (custom enums
///   that serialize to a JSON string, for instance).
#[proc_macro_derive(Structured, attributes(structured))]
pub fn derive_structured(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_structured_impl(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_structured_impl(input: DeriveInput) -> Result<TokenStream2, Error> {
    let name = &input.ident;

    let schema_name = parse_struct_name(&input)?.unwrap_or_else(|| to_snake_case(&name.to_string()));

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(Error::new(
                    input.ident.span(),
                    "Structured can only be derived for structs with named fields",
                ))
            }
        },
        _ => return Err(Error::new(input.ident.span(), "Structured can only be derived for structs")),
    };

    let mut field_specs = Vec::new();
    let mut property_entries = Vec::new();
    let mut required_names = Vec::new();

    for field in fields {
        let field_ident = field.ident.as_ref().unwrap();
        let field_name = field_ident.to_string();
        let attrs = parse_field_attrs(field)?;

        let is_option = is_option_type(&field.ty);
        let required = !is_option && !attrs.optional;

        let field_type = attrs.override_type.unwrap_or_else(|| infer_field_type(&field.ty));
        let field_type_tokens = field_type.to_tokens();
        let json_type = field_type.json_type_name();

        field_specs.push(if required {
            quote! { ::pdf_hunter_core::llm::FieldSpec::required(#field_name, #field_type_tokens) }
        } else {
            quote! { ::pdf_hunter_core::llm::FieldSpec::optional(#field_name, #field_type_tokens) }
        });

        property_entries.push(quote! {
            (#field_name, ::serde_json::json!({"type": #json_type}))
        });

        if required {
            required_names.push(field_name);
        }
    }

    let field_count = field_specs.len();

    let expanded = quote! {
        impl ::pdf_hunter_core::llm::StructuredSchema for #name {
            fn schema_name() -> &'static str {
                #schema_name
            }

            fn fields() -> &'static [::pdf_hunter_core::llm::FieldSpec] {
                static FIELDS: ::std::sync::OnceLock<[::pdf_hunter_core::llm::FieldSpec; #field_count]> = ::std::sync::OnceLock::new();
                FIELDS.get_or_init(|| [#(#field_specs),*])
            }

            fn json_schema() -> ::serde_json::Value {
                let properties: ::serde_json::Map<::std::string::String, ::serde_json::Value> =
                    [#(#property_entries),*]
                        .into_iter()
                        .map(|(k, v): (&str, ::serde_json::Value)| (k.to_string(), v))
                        .collect();
                ::serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": [#(#required_names),*],
                })
            }
        }
    };

    Ok(expanded)
}

/// Parse `#[structured(name = "...")]` at the struct level.
fn parse_struct_name(input: &DeriveInput) -> Result<Option<String>, Error> {
    let mut name = None;
    for attr in &input.attrs {
        if !attr.path().is_ident("structured") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unknown structured attribute, expected 'name'"))
            }
        })?;
    }
    Ok(name)
}

#[derive(Default)]
struct FieldAttrs {
    optional: bool,
    override_type: Option<FieldType>,
}

fn parse_field_attrs(field: &syn::Field) -> Result<FieldAttrs, Error> {
    let mut result = FieldAttrs::default();

    for attr in &field.attrs {
        if !attr.path().is_ident("structured") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("optional") {
                result.optional = true;
                Ok(())
            } else if meta.path.is_ident("string") {
                result.override_type = Some(FieldType::String);
                Ok(())
            } else if meta.path.is_ident("integer") {
                result.override_type = Some(FieldType::Integer);
                Ok(())
            } else if meta.path.is_ident("float") {
                result.override_type = Some(FieldType::Float);
                Ok(())
            } else if meta.path.is_ident("bool") {
                result.override_type = Some(FieldType::Bool);
                Ok(())
            } else if meta.path.is_ident("array") {
                result.override_type = Some(FieldType::Array);
                Ok(())
            } else if meta.path.is_ident("object") {
                result.override_type = Some(FieldType::Object);
                Ok(())
            } else {
                Err(meta.error(
                    "unknown structured field attribute, expected 'optional', 'string', \
                     'integer', 'float', 'bool', 'array', or 'object'",
                ))
            }
        })?;
    }

    Ok(result)
}

/// Mirrors `pdf_hunter_core::llm::schema::FieldType` without depending on
/// the crate at macro-expansion time.
#[derive(Clone, Copy)]
enum FieldType {
    String,
    Integer,
    Float,
    Bool,
    Array,
    Object,
}

impl FieldType {
    fn to_tokens(self) -> TokenStream2 {
        match self {
            Self::String => quote! { ::pdf_hunter_core::llm::FieldType::String },
            Self::Integer => quote! { ::pdf_hunter_core::llm::FieldType::Integer },
            Self::Float => quote! { ::pdf_hunter_core::llm::FieldType::Float },
            Self::Bool => quote! { ::pdf_hunter_core::llm::FieldType::Bool },
            Self::Array => quote! { ::pdf_hunter_core::llm::FieldType::Array },
            Self::Object => quote! { ::pdf_hunter_core::llm::FieldType::Object },
        }
    }

    /// The JSON Schema `"type"` keyword for this field, used in
    /// `json_schema()`'s `properties` map.
    fn json_type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "number",
            Self::Bool => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Infer a field's `FieldType` from its Rust type. Unrecognized named types
/// (custom enums like `Verdict`) default to `String` since every such type
/// in this crate round-trips through `serde`'s `rename_all = "snake_case"`
/// external string tagging.
fn infer_field_type(ty: &Type) -> FieldType {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            let ident_str = segment.ident.to_string();
            return match ident_str.as_str() {
                "String" | "str" => FieldType::String,
                "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64" | "u128" | "usize" => {
                    FieldType::Integer
                }
                "f32" | "f64" => FieldType::Float,
                "bool" => FieldType::Bool,
                "Vec" => FieldType::Array,
                "Option" => {
                    if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                        if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                            return infer_field_type(inner);
                        }
                    }
                    FieldType::String
                }
                _ => FieldType::String,
            };
        }
    }
    FieldType::String
}

fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

/// `PageAnalysis` -> `page_analysis`, `TriageResult` -> `triage_result`.
fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::to_snake_case;

    #[test]
    fn snake_case_conversion() {
        assert_eq!(to_snake_case("TriageResult"), "triage_result");
        assert_eq!(to_snake_case("PageAnalysis"), "page_analysis");
        assert_eq!(to_snake_case("FinalVerdict"), "final_verdict");
    }
}
