//! Format layer creation

use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::registry::LookupSpan;

use crate::config::{DisplayConfig, Format};

/// A format layer erased to one type regardless of format and timer.
pub(crate) type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Build the human-readable layer for `pretty` or `compact` output.
macro_rules! create_fmt_layer {
    ($format:ident, $display:expr) => {{
        let display = $display;
        let layer = tracing_subscriber::fmt::layer()
            .$format()
            .with_writer(std::io::stderr)
            .with_ansi(display.colors)
            .with_target(display.target)
            .with_file(display.source)
            .with_line_number(display.source)
            .with_thread_ids(display.thread_ids);

        if display.time {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    }};
}

/// Build the JSON layer (has additional options).
macro_rules! create_json_layer {
    ($display:expr) => {{
        let display = $display;
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(display.target)
            .with_file(display.source)
            .with_line_number(display.source)
            .with_thread_ids(display.thread_ids);

        if display.time {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    }};
}

/// The stderr layer for `format`.
pub(crate) fn fmt_layer<S>(format: Format, display: &DisplayConfig) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    match format {
        Format::Pretty => create_fmt_layer!(pretty, display),
        Format::Compact => create_fmt_layer!(compact, display),
        Format::Json => create_json_layer!(display),
    }
}
