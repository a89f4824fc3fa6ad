//! `#[traced]`: entry/exit trace events for lifecycle functions.
//!
//! ```ignore
//! #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
//! fn load(&self, path: &str) -> Result<(), PluginError> { ... }
//! ```
//!
//! `instrument(...)` is forwarded verbatim to `tracing::instrument`; `timing`
//! appends the elapsed time to the exit event.

extern crate proc_macro;

use proc_macro2::TokenStream;
use quote::{ToTokens, quote, quote_spanned};
use syn::{ItemFn, Stmt, parse::Parse, parse_macro_input, parse_quote};

mod keywords {
    syn::custom_keyword!(timing);
    syn::custom_keyword!(precision);
    syn::custom_keyword!(instrument);
}

#[derive(PartialEq, Eq, Clone, Copy, Default)]
enum Precision {
    #[default]
    Nanos,
    Micros,
    Millis,
    Seconds,
}

impl Precision {
    fn parse_unit(unit: &str) -> Option<Self> {
        match unit {
            "ns" | "nanos" | "nanoseconds" => Some(Self::Nanos),
            "us" | "micros" | "microseconds" => Some(Self::Micros),
            "ms" | "millis" | "milliseconds" => Some(Self::Millis),
            "s" | "secs" | "seconds" => Some(Self::Seconds),
            _ => None,
        }
    }

    /// Expression rendering `elapsed: std::time::Duration` in this unit.
    fn render(self) -> TokenStream {
        match self {
            Self::Nanos => quote!(format!("{} ns", elapsed.as_nanos())),
            Self::Micros => quote!(format!("{} us", elapsed.as_micros())),
            Self::Millis => quote!(format!("{} ms", elapsed.as_millis())),
            Self::Seconds => quote!(format!("{:.3} s", elapsed.as_secs_f64())),
        }
    }
}

impl Parse for Precision {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        if !input.peek(syn::token::Paren) {
            return Ok(Self::default());
        }

        let content;
        syn::parenthesized!(content in input);
        content.parse::<keywords::precision>()?;
        content.parse::<syn::Token![=]>()?;
        let unit = content.parse::<syn::LitStr>()?;

        Self::parse_unit(&unit.value())
            .ok_or_else(|| syn::Error::new(unit.span(), "unknown timing precision"))
    }
}

#[derive(Default)]
struct Attributes {
    timing: Option<Precision>,
    instrument: Option<TokenStream>,
    unknown: Vec<syn::Error>,
}

impl Attributes {
    /// Unknown arguments surface as deprecation warnings rather than hard errors.
    fn warnings(&self) -> TokenStream {
        let warnings = self.unknown.iter().map(|err| {
            let note = syn::LitStr::new(&format!("ignored `traced` argument: {err}"), err.span());
            quote_spanned! {err.span()=>
                #[warn(deprecated)]
                {
                    #[deprecated(note = #note)]
                    const TRACED_ARGUMENT: () = ();
                    let () = TRACED_ARGUMENT;
                }
            }
        });

        quote! { #(#warnings)* }
    }
}

impl Parse for Attributes {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut attributes = Self::default();

        while !input.is_empty() {
            let lookahead = input.lookahead1();
            if lookahead.peek(keywords::timing) {
                if attributes.timing.is_some() {
                    return Err(input.error("`timing` given more than once"));
                }
                input.parse::<keywords::timing>()?;
                attributes.timing = Some(input.parse()?);
            } else if lookahead.peek(keywords::instrument) {
                if attributes.instrument.is_some() {
                    return Err(input.error("`instrument` given more than once"));
                }
                input.parse::<keywords::instrument>()?;
                let content;
                syn::parenthesized!(content in input);
                attributes.instrument = Some(content.parse()?);
            } else if lookahead.peek(syn::Token![,]) {
                input.parse::<syn::Token![,]>()?;
            } else {
                attributes.unknown.push(lookahead.error());
                input.parse::<proc_macro2::TokenTree>()?;
            }
        }

        Ok(attributes)
    }
}

/// Emits `tracing::trace!` events when the attributed function is entered and
/// when it returns (including early returns and unwinding).
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let args = parse_macro_input!(args as Attributes);
    let mut item_fn = parse_macro_input!(item as ItemFn);

    if let Some(fields) = &args.instrument {
        let fields = fields.to_token_stream();
        item_fn
            .attrs
            .push(parse_quote! { #[tracing::instrument(#fields)] });
    }

    let name = item_fn.sig.ident.to_string();
    let warnings = args.warnings();
    let on_exit = args.timing.map_or_else(
        || quote! { tracing::trace!("exit: {}", #name); },
        |precision| {
            let render = precision.render();
            quote! {
                let elapsed = self.0.elapsed();
                tracing::trace!("exit: {} ({})", #name, #render);
            }
        },
    );

    let prologue: Vec<Stmt> = parse_quote! {
        #warnings

        struct __TracedGuard(std::time::Instant);

        impl std::ops::Drop for __TracedGuard {
            fn drop(&mut self) {
                #on_exit
            }
        }

        tracing::trace!("enter: {}", #name);
        let __traced_guard = __TracedGuard(std::time::Instant::now());
    };

    item_fn.attrs.push(parse_quote! {
        #[allow(clippy::items_after_statements)]
    });
    item_fn.block.stmts.splice(0..0, prologue);

    quote! { #item_fn }.into()
}
