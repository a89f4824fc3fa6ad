//! Log output for the whole process.
//!
//! Events are grouped into categories, each emitted under its own
//! `hermod::<category>` target inside a span of the same name. `LOG_LEVEL`
//! sets the level, `LOG_CATEGORIES` (comma separated) limits output to the
//! categories named.

use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Every category the macros below log under.
pub const CATEGORIES: [&str; 3] = ["internal", "plugin", "delivery"];

#[macro_export]
macro_rules! log {
    ($level:expr, $category:literal, $($msg:expr),*) => {{
        let span = $crate::tracing::span!(target: concat!("hermod::", $category), $level, $category);
        let _enter = span.enter();

        $crate::tracing::event!(target: concat!("hermod::", $category), $level, $($msg),*)
    }};
}

/// Runtime lifecycle: worker pool, scanner, retry store.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// Plugin loading, unloading and service resolution.
#[macro_export]
macro_rules! plugin {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "plugin", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::plugin!(level = TRACE, $($msg),*)
    };
}

/// Per-message events; pair with [`MessageContext`](crate::MessageContext)'s
/// `Display` to get the bound-type prefix.
#[macro_export]
macro_rules! delivery {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "delivery", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::delivery!(level = TRACE, $($msg),*)
    };
}

/// The categories named in `spec`, all of them when it is absent or names
/// none that exist.
fn categories(spec: Option<&str>) -> Vec<&'static str> {
    let named: Vec<&'static str> = spec
        .map(|spec| {
            CATEGORIES
                .into_iter()
                .filter(|category| spec.split(',').any(|name| name.trim() == *category))
                .collect()
        })
        .unwrap_or_default();

    if named.is_empty() { CATEGORIES.to_vec() } else { named }
}

/// Hermod's own targets pass, category targets only when enabled.
fn keep(target: &str, enabled: &[&str]) -> bool {
    match target.strip_prefix("hermod::") {
        Some(category) if CATEGORIES.contains(&category) => enabled.contains(&category),
        _ => target.starts_with("hermod"),
    }
}

pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let level = std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    });
    let enabled = categories(std::env::var("LOG_CATEGORIES").ok().as_deref());

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .with_thread_names(true)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(move |metadata| keep(metadata.target(), &enabled))),
        )
        .init();
}
