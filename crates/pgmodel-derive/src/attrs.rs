//! Parsing of struct-level and field-level `#[orm(...)]` attributes.

use syn::parse::{Parse, ParseStream};
use syn::{Attribute, LitStr, Result, Token};

/// Struct-level attributes.
#[derive(Default)]
pub(crate) struct StructAttr {
    pub table: Option<String>,
}

impl Parse for StructAttr {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut out = StructAttr::default();

        while !input.is_empty() {
            let ident: syn::Ident = input.parse()?;
            if ident == "table" {
                let _: Token![=] = input.parse()?;
                let value: LitStr = input.parse()?;
                out.table = Some(value.value());
            } else {
                return Err(syn::Error::new_spanned(
                    &ident,
                    format!("unknown struct attribute `{ident}`, expected `table`"),
                ));
            }

            if input.peek(Token![,]) {
                let _: Token![,] = input.parse()?;
            } else {
                break;
            }
        }

        Ok(out)
    }
}

/// Field-level attributes.
#[derive(Default)]
pub(crate) struct FieldAttr {
    pub primary_key: bool,
    pub skip: bool,
    pub embed: bool,
    pub column: Option<String>,
    pub default: Option<String>,
}

impl FieldAttr {
    fn merge(&mut self, other: FieldAttr) {
        self.primary_key |= other.primary_key;
        self.skip |= other.skip;
        self.embed |= other.embed;
        if other.column.is_some() {
            self.column = other.column;
        }
        if other.default.is_some() {
            self.default = other.default;
        }
    }
}

impl Parse for FieldAttr {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut out = FieldAttr::default();

        while !input.is_empty() {
            let ident: syn::Ident = input.parse()?;
            match ident.to_string().as_str() {
                "primary_key" | "id" => out.primary_key = true,
                "skip" => out.skip = true,
                "embed" => out.embed = true,
                "column" | "default" => {
                    let _: Token![=] = input.parse()?;
                    let value: LitStr = input.parse()?;
                    if ident == "column" {
                        out.column = Some(value.value());
                    } else {
                        out.default = Some(value.value());
                    }
                }
                other => {
                    return Err(syn::Error::new_spanned(
                        &ident,
                        format!(
                            "unknown field attribute `{other}`, expected one of \
                             `primary_key`, `id`, `column`, `default`, `embed`, `skip`"
                        ),
                    ));
                }
            }

            if input.peek(Token![,]) {
                let _: Token![,] = input.parse()?;
            } else {
                break;
            }
        }

        Ok(out)
    }
}

pub(crate) fn struct_attr(attrs: &[Attribute]) -> Result<StructAttr> {
    let mut out = StructAttr::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("orm")) {
        let parsed: StructAttr = attr.parse_args()?;
        if parsed.table.is_some() {
            out.table = parsed.table;
        }
    }
    Ok(out)
}

pub(crate) fn field_attr(attrs: &[Attribute]) -> Result<FieldAttr> {
    let mut out = FieldAttr::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("orm")) {
        out.merge(attr.parse_args()?);
    }
    Ok(out)
}
