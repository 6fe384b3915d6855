/*!
 * Monitoring
 * Tracing setup and request spans
 */

mod tracer;

pub use tracer::{init_tracing, span_request, RequestSpan};
