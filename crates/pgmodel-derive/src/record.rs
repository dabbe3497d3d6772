//! Record derive macro implementation

use crate::attrs::{field_attr, struct_attr};
use heck::ToSnakeCase;
use proc_macro2::TokenStream;
use quote::quote;
use syn::ext::IdentExt;
use syn::{Data, DeriveInput, Fields, Result};

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Record can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Record can only be derived for structs",
            ));
        }
    };

    let table = struct_attr(&input.attrs)?
        .table
        .unwrap_or_else(|| name.unraw().to_string().to_snake_case());

    let mut defs = Vec::new();
    let mut values = Vec::new();
    let mut reads = Vec::new();
    let mut primary_key: Option<&syn::Ident> = None;

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let attr = field_attr(&field.attrs)?;
        if attr.skip {
            continue;
        }

        let ty = &field.ty;
        if attr.embed {
            if attr.primary_key || attr.column.is_some() || attr.default.is_some() {
                return Err(syn::Error::new_spanned(
                    field,
                    "an embedded record cannot carry primary_key, column or default",
                ));
            }
            defs.push(quote! {
                defs.extend(<#ty as pgmodel::Record>::field_defs());
            });
            values.push(quote! {
                values.extend(pgmodel::Record::field_values(&self.#ident));
            });
            reads.push(quote! {
                pgmodel::Record::read_row(&mut self.#ident, row)?;
            });
            continue;
        }

        if attr.primary_key {
            if let Some(first) = primary_key {
                return Err(syn::Error::new_spanned(
                    ident,
                    format!("`{first}` is already the primary key; a record has at most one"),
                ));
            }
            primary_key = Some(ident);
        }

        let field_name = ident.unraw().to_string();
        let column = attr.column.map(|c| quote! { .with_column(#c) });
        let pk = attr.primary_key.then(|| quote! { .as_primary_key() });
        let default = attr.default.map(|d| quote! { .with_default(#d) });

        defs.push(quote! {
            defs.push(pgmodel::FieldDef::new(#field_name) #column #pk #default);
        });
        values.push(quote! {
            values.push(pgmodel::FieldValue::of(&self.#ident));
        });
        reads.push(quote! {
            self.#ident = row.next_column()?;
        });
    }

    Ok(quote! {
        impl #impl_generics pgmodel::Record for #name #ty_generics #where_clause {
            fn table_name() -> &'static str {
                #table
            }

            fn field_defs() -> ::std::vec::Vec<pgmodel::FieldDef> {
                #[allow(unused_mut)]
                let mut defs = ::std::vec::Vec::new();
                #(#defs)*
                defs
            }

            fn field_values(&self) -> ::std::vec::Vec<pgmodel::FieldValue> {
                #[allow(unused_mut)]
                let mut values = ::std::vec::Vec::new();
                #(#values)*
                values
            }

            #[allow(unused_variables)]
            fn read_row(
                &mut self,
                row: &mut pgmodel::RowCursor<'_>,
            ) -> pgmodel::OrmResult<()> {
                #(#reads)*
                ::std::result::Result::Ok(())
            }
        }
    })
}
