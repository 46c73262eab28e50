use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, parse_quote, Data, DeriveInput, Fields};

/// Derives `named_vec_ops::NamedVecOps` plus the element-wise operators the
/// trait requires (`+`, `-`, `+=`, `-=`, scalar `*`).
///
/// The struct must have named fields that all share the generic scalar `T`.
#[proc_macro_derive(NamedVecOps)]
pub fn named_vec_ops_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let generics = input.generics.clone();
    let (impl_generics, ty_generics, original_where_clause) = generics.split_for_impl();

    let mut where_clause = original_where_clause.cloned().unwrap_or(syn::WhereClause {
        where_token: Default::default(),
        predicates: syn::punctuated::Punctuated::new(),
    });

    where_clause.predicates.push(parse_quote! {
        T: Copy
         + ::nalgebra::Scalar
         + std::ops::Add<Output = T>
         + std::ops::Sub<Output = T>
         + std::ops::Mul<Output = T>
         + std::ops::AddAssign
         + std::ops::SubAssign
    });

    let fields = match &input.data {
        Data::Struct(data_struct) => {
            if let Fields::Named(fields_named) = &data_struct.fields {
                &fields_named.named
            } else {
                return syn::Error::new_spanned(name, "NamedVecOps can only be derived for structs with named fields")
                    .to_compile_error()
                    .into();
            }
        }
        _ => {
            return syn::Error::new_spanned(name, "NamedVecOps can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let n_fields = fields.len();
    let n_literal = syn::Index::from(n_fields);
    let field_names: Vec<_> = fields.iter().map(|f| &f.ident).collect();
    let field_indexes: Vec<_> = (0..n_fields).map(syn::Index::from).collect();

    let expanded = quote! {
        impl #impl_generics named_vec_ops::NamedVecOps<T, #n_literal> for #name #ty_generics #where_clause {
            fn to_svector(&self) -> ::nalgebra::SVector<T, #n_literal> {
                ::nalgebra::SVector::from([
                    #(self.#field_names),*
                ])
            }
            fn from_svector(v: &::nalgebra::SVector<T, #n_literal>) -> Self {
                Self {
                    #(#field_names: v[#field_indexes]),*
                }
            }
        }

        impl #impl_generics std::ops::Add for #name #ty_generics #where_clause {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self {
                    #(#field_names: self.#field_names + rhs.#field_names),*
                }
            }
        }

        impl #impl_generics std::ops::Sub for #name #ty_generics #where_clause {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self {
                    #(#field_names: self.#field_names - rhs.#field_names),*
                }
            }
        }

        impl #impl_generics std::ops::AddAssign for #name #ty_generics #where_clause {
            fn add_assign(&mut self, rhs: Self) {
                #(self.#field_names += rhs.#field_names;)*
            }
        }

        impl #impl_generics std::ops::SubAssign for #name #ty_generics #where_clause {
            fn sub_assign(&mut self, rhs: Self) {
                #(self.#field_names -= rhs.#field_names;)*
            }
        }

        impl #impl_generics std::ops::Mul<T> for #name #ty_generics #where_clause {
            type Output = Self;

            fn mul(self, rhs: T) -> Self {
                Self {
                    #(#field_names: self.#field_names * rhs),*
                }
            }
        }
    };

    TokenStream::from(expanded)
}
