use sentry::protocol::{Context, Event, Request as SentryRequest};
use std::sync::Arc;

const REDACTED: &str = "[REDACTED]";

/// Field, header and query names that may carry a Gemini credential
const SENSITIVE_FIELDS: &[&str] = &[
    "api_key",
    "apikey",
    "x-goog-api-key",
    "authorization",
    "token",
    "secret",
];

fn is_sensitive_field(field_name: &str) -> bool {
    let field_lower = field_name.to_lowercase();
    SENSITIVE_FIELDS
        .iter()
        .any(|sensitive| field_lower.contains(sensitive))
}

/// `key=` is how Google APIs accept a key in the query string
fn is_sensitive_query_param(name: &str) -> bool {
    name.eq_ignore_ascii_case("key") || is_sensitive_field(name)
}

fn drop_sensitive_keys<V>(map: &mut std::collections::BTreeMap<String, V>) {
    map.retain(|k, _| !is_sensitive_field(k));
}

/// Strip user API keys from an event before it leaves the process
pub fn scrub_sensitive_data(mut event: Event<'static>) -> Option<Event<'static>> {
    if let Some(request) = &mut event.request {
        scrub_request(request);
    }

    drop_sensitive_keys(&mut event.extra);

    for context in event.contexts.values_mut() {
        if let Context::Other(map) = context {
            drop_sensitive_keys(map);
        }
    }

    for breadcrumb in event.breadcrumbs.values.iter_mut() {
        drop_sensitive_keys(&mut breadcrumb.data);
    }

    Some(event)
}

fn scrub_request(request: &mut SentryRequest) {
    for (name, value) in request.headers.iter_mut() {
        if is_sensitive_field(name) {
            *value = REDACTED.to_string();
        }
    }

    if let Some(query) = &request.query_string {
        request.query_string = Some(scrub_query(query));
    }

    if let Some(url) = &mut request.url {
        if let Some(query) = url.query().map(scrub_query) {
            url.set_query(Some(&query));
        }
    }

    // The generate body carries the key in plain JSON
    if let Some(data) = &request.data {
        if is_sensitive_field(data) {
            request.data = Some(format!("{REDACTED} body contains a credential"));
        }
    }
}

fn scrub_query(query: &str) -> String {
    query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((name, _)) if is_sensitive_query_param(name) => format!("{name}={REDACTED}"),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

pub fn create_before_send() -> Arc<dyn Fn(Event<'static>) -> Option<Event<'static>> + Send + Sync> {
    Arc::new(scrub_sensitive_data)
}
