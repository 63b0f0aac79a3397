//! Attribute macros that wrap functions with `tracing` instrumentation.
//!
//! `#[traced]` emits an `OnEnter`/`OnExit` trace pair around the function body,
//! optionally forwards arguments to `tracing::instrument`, and can report the
//! elapsed time on exit:
//!
//! ```ignore
//! #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
//! pub async fn run_pass(&self, settings: &QueueSettings) -> PassOutcome { .. }
//! ```

extern crate proc_macro;

use proc_macro2::TokenStream;
use quote::{ToTokens, quote, quote_spanned};
use syn::{ItemFn, Stmt, parse::Parse, parse_macro_input, parse_quote};

#[derive(PartialEq, Eq, Clone, Copy, Default)]
enum Precision {
    #[default]
    Nanos,
    Micros,
    Millis,
    Seconds,
    Unspecified,
}

impl Precision {
    /// Closure expression that formats the elapsed `Duration` at this precision.
    fn formatter(self) -> syn::Expr {
        match self {
            Self::Nanos => {
                parse_quote!(|d: std::time::Duration| format!("{} ns elapsed", d.as_nanos()))
            }
            Self::Micros => {
                parse_quote!(|d: std::time::Duration| format!("{} us elapsed", d.as_micros()))
            }
            Self::Millis => {
                parse_quote!(|d: std::time::Duration| format!("{} ms elapsed", d.as_millis()))
            }
            Self::Seconds => {
                parse_quote!(|d: std::time::Duration| format!("{} s elapsed", d.as_secs()))
            }
            Self::Unspecified => parse_quote!(|_: std::time::Duration| String::default()),
        }
    }
}

impl From<&str> for Precision {
    fn from(value: &str) -> Self {
        match value {
            "ns" | "nanos" => Self::Nanos,
            "us" | "micros" => Self::Micros,
            "ms" | "millis" => Self::Millis,
            "s" | "secs" | "seconds" => Self::Seconds,
            _ => Self::Unspecified,
        }
    }
}

impl Parse for Precision {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        if !input.peek(syn::token::Paren) {
            return Ok(Self::default());
        }

        let content;
        let _ = syn::parenthesized!(content in input);
        let _ = content.parse::<keywords::precision>()?;
        let _ = content.parse::<syn::Token![=]>()?;
        let precision = content.parse::<syn::LitStr>()?.value();

        Ok(Self::from(precision.as_str()))
    }
}

mod keywords {
    syn::custom_keyword!(timing);
    syn::custom_keyword!(precision);
    syn::custom_keyword!(instrument);
}

#[derive(Default)]
struct Attributes {
    timing: Option<Precision>,
    instrument: Option<TokenStream>,
    unrecognised: Vec<syn::Error>,
}

impl Attributes {
    /// Surface unrecognised arguments as deprecation warnings rather than hard errors.
    fn warnings(&self) -> TokenStream {
        let warnings = self.unrecognised.iter().map(|err| {
            let msg = syn::LitStr::new(&format!("unrecognised `traced` input, {err}"), err.span());

            quote_spanned! {err.span()=>
                #[warn(deprecated)]
                {
                    #[deprecated(since = "0.0.0", note = #msg)]
                    #[allow(non_upper_case_globals)]
                    const traced_unrecognised_input: () = ();
                    let () = traced_unrecognised_input;
                }
            }
        });

        quote! {
            { #(#warnings)* }
        }
    }
}

impl Parse for Attributes {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut attributes = Self::default();

        while !input.is_empty() {
            let lookahead = input.lookahead1();
            if lookahead.peek(keywords::timing) {
                if attributes.timing.is_some() {
                    return Err(input.error("expected only a single `timing` argument"));
                }

                let _ = input.parse::<keywords::timing>()?;
                attributes.timing = Some(input.parse()?);
            } else if lookahead.peek(keywords::instrument) {
                if attributes.instrument.is_some() {
                    return Err(input.error("expected only a single `instrument` argument"));
                }

                let _ = input.parse::<keywords::instrument>()?;
                attributes.instrument = Some(if input.peek(syn::token::Paren) {
                    let content;
                    let _ = syn::parenthesized!(content in input);
                    content.parse()?
                } else {
                    TokenStream::new()
                });
            } else if lookahead.peek(syn::Token![,]) {
                let _ = input.parse::<syn::Token![,]>()?;
            } else {
                attributes.unrecognised.push(lookahead.error());
                let _ = input.parse::<proc_macro2::TokenTree>();
            }
        }

        Ok(attributes)
    }
}

/// Adds `tracing::trace!` events at the start and end of an attributed function.
///
/// # Panics
///
/// When applied to anything other than a function.
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let args = parse_macro_input!(args as Attributes);
    let warnings = args.warnings();

    let mut item_fn = parse_macro_input!(item as ItemFn);

    item_fn
        .attrs
        .push(parse_quote! { #[allow(clippy::items_after_statements)] });

    if let Some(fields) = &args.instrument {
        let fields = fields.to_token_stream();
        item_fn
            .attrs
            .push(parse_quote! { #[tracing::instrument(#fields)] });
    }

    let id = item_fn.sig.ident.to_string();
    let on_exit: Stmt = match args.timing {
        None => parse_quote! { tracing::trace!("OnExit: {}", #id); },
        Some(precision) => {
            let format = precision.formatter();
            parse_quote! { tracing::trace!("OnExit: {} ({})", #id, (#format)(self.timer.elapsed())); }
        }
    };

    let guard: Vec<Stmt> = parse_quote! {
        #[allow(dead_code)]
        struct __Traced {
            timer: std::time::Instant,
        }

        impl __Traced {
            fn enter() -> Self {
                #warnings

                tracing::trace!("OnEnter: {}", #id);
                Self {
                    timer: std::time::Instant::now(),
                }
            }
        }

        impl std::ops::Drop for __Traced {
            fn drop(&mut self) {
                #on_exit
            }
        }

        let __traced = __Traced::enter();
    };

    let body = std::mem::take(&mut item_fn.block.stmts);
    item_fn.block.stmts = guard.into_iter().chain(body).collect();

    quote! { #item_fn }.into()
}
