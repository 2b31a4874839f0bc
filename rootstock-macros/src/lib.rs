// These lints are triggered by darling's generated code for
// `#[darling(default)]`.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::needless_continue)]

use std::collections::HashSet;

use darling::{
    FromDeriveInput,
    util::{Flag, PathList},
};
use heck::ToKebabCase;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, quote};
use syn::{DeriveInput, Ident, Path, parse_macro_input};

/// Returns the kind override or the default kebab-case name from the ident.
fn default_kind(ident: &Ident, kind: Option<String>) -> String {
    kind.unwrap_or_else(|| ident.to_string().to_kebab_case())
}

/// Configuration for the `#[event(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(event), supports(struct_any, enum_any))]
struct EventArgs {
    ident: Ident,
    #[darling(default)]
    kind: Option<String>,
    #[darling(default)]
    implements: PathList,
    #[darling(default)]
    extends: PathList,
}

/// Configuration for the `#[aggregate(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(aggregate), supports(struct_any))]
struct AggregateArgs {
    ident: Ident,
    #[darling(default)]
    kind: Option<String>,
    #[darling(default)]
    events: PathList,
    #[darling(default)]
    interfaces: PathList,
    #[darling(default)]
    polymorphic: Flag,
}

/// Parse derive input with darling and render errors as tokens.
fn parse_or_error<T, F>(input: &DeriveInput, f: F) -> TokenStream2
where
    T: FromDeriveInput,
    F: FnOnce(T) -> TokenStream2,
{
    match T::from_derive_input(input) {
        Ok(args) => f(args),
        Err(err) => err.write_errors(),
    }
}

/// Report every path listed more than once across `lists`.
fn check_duplicates<'a>(lists: impl IntoIterator<Item = &'a Path>) -> darling::Result<()> {
    let mut seen = HashSet::new();
    let mut errors = darling::Error::accumulator();
    for path in lists {
        let key = path.to_token_stream().to_string();
        if !seen.insert(key) {
            errors.push(
                darling::Error::custom(format!(
                    "`{}` is listed more than once",
                    path.to_token_stream()
                ))
                .with_span(path),
            );
        }
    }
    errors.finish()
}

/// Derives the `DomainEvent` trait for a struct or enum.
///
/// # Attributes
///
/// All optional:
/// - `kind = "name"` - Event type identifier (default: kebab-case type name)
/// - `implements(Trait1, Trait2, ...)` - Interfaces the event answers to
///   under polymorphic routing. The event must implement each trait; an
///   `Upcast<dyn Trait>` impl is generated.
/// - `extends(Base1, Base2, ...)` - Base chain, most derived first. Each base
///   needs a hand-written `Upcast<Base>` impl.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, DomainEvent)]
/// #[event(implements(Named), extends(AnimalBorn))]
/// pub struct DogBorn {
///     animal: AnimalBorn,
///     name: String,
/// }
/// ```
#[proc_macro_derive(DomainEvent, attributes(event))]
pub fn derive_domain_event(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_domain_event_impl(&input).into()
}

/// Internal entry point that returns tokens for the event derive.
fn derive_domain_event_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<EventArgs, _>(input, |args| generate_domain_event_impl(args, input))
}

/// Generate the event derive implementation tokens.
fn generate_domain_event_impl(args: EventArgs, input: &DeriveInput) -> TokenStream2 {
    if let Err(err) = check_duplicates(args.implements.iter().chain(args.extends.iter())) {
        return err.write_errors();
    }

    let name = &args.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let kind = default_kind(name, args.kind);
    let interfaces: Vec<&Path> = args.implements.iter().collect();
    let bases: Vec<&Path> = args.extends.iter().collect();

    let lineage = if interfaces.is_empty() && bases.is_empty() {
        quote! {}
    } else {
        quote! {
            fn lineage() -> ::rootstock::event::Lineage<Self> {
                ::rootstock::event::Lineage::new()
                    #(.implements::<dyn #interfaces>())*
                    #(.extends::<#bases>())*
            }
        }
    };

    quote! {
        impl #impl_generics ::rootstock::DomainEvent for #name #ty_generics #where_clause {
            const KIND: &'static str = #kind;

            #lineage
        }

        #(
            impl #impl_generics ::rootstock::Upcast<dyn #interfaces> for #name #ty_generics
            #where_clause
            {
                fn upcast(&self) -> &(dyn #interfaces + 'static) {
                    self
                }
            }
        )*
    }
}

/// Derives the `AggregateState` trait for a struct.
///
/// Registers one `Apply<T>` handler per listed type when the root is built.
///
/// # Attributes
///
/// - `events(Event1, Event2, ...)` - Types handled via `Apply<T>`: concrete
///   events, or also base types under `polymorphic`. With exact routing every
///   entry must implement `DomainEvent`.
/// - `interfaces(Trait1, ...)` - Interfaces handled via `Apply<dyn Trait>`;
///   requires `polymorphic`
/// - `polymorphic` - Route with `PolymorphicRouter` (fan-out along each
///   event's lineage) instead of `ExactRouter`
/// - `kind = "name"` - Aggregate type identifier (default: kebab-case struct
///   name)
///
/// At least one of `events` or `interfaces` is required.
///
/// # Example
///
/// ```ignore
/// #[derive(Default, AggregateState)]
/// #[aggregate(events(DogBorn, DogBarked))]
/// pub struct Dog {
///     name: String,
///     barks: u32,
/// }
/// ```
#[proc_macro_derive(AggregateState, attributes(aggregate))]
pub fn derive_aggregate_state(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_aggregate_state_impl(&input).into()
}

/// Internal entry point that returns tokens for the aggregate state derive.
fn derive_aggregate_state_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<AggregateArgs, _>(input, |args| generate_aggregate_state_impl(args, input))
}

/// Generate the aggregate state derive implementation tokens.
fn generate_aggregate_state_impl(args: AggregateArgs, input: &DeriveInput) -> TokenStream2 {
    if args.events.is_empty() && args.interfaces.is_empty() {
        return darling::Error::custom(
            "events(...) or interfaces(...) must contain at least one type",
        )
        .with_span(&input.ident)
        .write_errors();
    }
    if !args.polymorphic.is_present() && !args.interfaces.is_empty() {
        return darling::Error::custom("interfaces(...) requires `polymorphic` routing")
            .with_span(&input.ident)
            .write_errors();
    }
    if let Err(err) = check_duplicates(args.events.iter().chain(args.interfaces.iter())) {
        return err.write_errors();
    }

    let name = &args.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let kind = default_kind(name, args.kind);
    let events: Vec<&Path> = args.events.iter().collect();
    let interfaces: Vec<&Path> = args.interfaces.iter().collect();

    let (router, event_check) = if args.polymorphic.is_present() {
        (quote! { ::rootstock::router::PolymorphicRouter<Self> }, quote! {})
    } else {
        // Exact routing only keys on concrete events.
        (
            quote! { ::rootstock::router::ExactRouter<Self> },
            quote! {
                fn routed_by_exact_type<T: ::rootstock::DomainEvent>() {}
                #( routed_by_exact_type::<#events>(); )*
            },
        )
    };

    quote! {
        impl #impl_generics ::rootstock::AggregateState for #name #ty_generics #where_clause {
            const KIND: &'static str = #kind;
            type Router = #router;

            fn routes(
                router: &mut Self::Router,
            ) -> ::core::result::Result<(), ::rootstock::router::RouteError> {
                #event_check
                #(
                    <Self::Router as ::rootstock::router::EventRouter<Self>>::register::<dyn #interfaces, _>(
                        router,
                        <Self as ::rootstock::Apply<dyn #interfaces>>::apply,
                    )?;
                )*
                #(
                    <Self::Router as ::rootstock::router::EventRouter<Self>>::register::<#events, _>(
                        router,
                        <Self as ::rootstock::Apply<#events>>::apply,
                    )?;
                )*
                ::core::result::Result::Ok(())
            }
        }
    }
}
