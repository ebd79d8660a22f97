//! The catch-all handler that turns an entry-path request into a 302.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::header::{CACHE_CONTROL, LOCATION};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use url::Url;

use crate::analytics::AnalyticsEvent;
use crate::analytics::ga4::client_id_from_headers;
use crate::config::test::TestDefinition;
use crate::error::{Error, ErrorDetails};
use crate::experimentation::{
    BucketId, BucketStatsSnapshot, RandSource, load_bucket_stats, select_bucket,
};
use crate::session;
use crate::utils::gateway::{AppState, AppStateData};

const REDIRECT_CACHE_CONTROL: &str = "no-store, private";

/// Where the visitor's bucket came from on this request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AssignmentSource {
    Cookie,
    Selected,
    Override,
}

impl AssignmentSource {
    fn as_str(self) -> &'static str {
        match self {
            AssignmentSource::Cookie => "cookie",
            AssignmentSource::Selected => "selected",
            AssignmentSource::Override => "override",
        }
    }

    /// Whether the response must (re)write the assignment cookie.
    fn binds(self) -> bool {
        match self {
            AssignmentSource::Cookie => false,
            AssignmentSource::Selected | AssignmentSource::Override => true,
        }
    }
}

/// Routes a visitor on an entry path to their bucket's target.
///
/// Resolution order: debug override, then the sticky cookie, then a fresh
/// selection. Stats store and analytics outages degrade the selection or
/// lose the view event, but never fail the redirect.
///
/// `HEAD` requests (link unfurlers, prefetchers) get the same redirect but
/// neither bind a cookie nor record a view, so they cannot feed the stats.
pub async fn edge_redirect_handler(
    State(app_state): AppState,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, Error> {
    if method != Method::GET && method != Method::HEAD {
        return Err(Error::new(ErrorDetails::RouteNotFound {
            path: uri.path().to_string(),
            method: method.to_string(),
        }));
    }

    let Some(test) = app_state.config.active_test_for_path(uri.path()) else {
        return Err(Error::new(ErrorDetails::TestNotFound {
            path: uri.path().to_string(),
        }));
    };
    metrics::counter!("edgesplit_requests_total", "test_id" => test.id.clone()).increment(1);

    let override_param = app_state.config.gateway.debug_override_param.as_str();
    let query_pairs: Vec<(String, String)> = uri
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let (bucket, source) = match override_bucket(test, &query_pairs, override_param) {
        Some(bucket) => (bucket, AssignmentSource::Override),
        None => match session::lookup(&headers, &test.id) {
            Some(bucket) => (bucket, AssignmentSource::Cookie),
            None => (
                assign_new_visitor(&app_state, test).await,
                AssignmentSource::Selected,
            ),
        },
    };

    let (bucket, target) = resolve_target(test, bucket);
    let mut target = target.clone();
    if app_state.config.gateway.forward_query_string
        && let Some(query) = uri.query()
    {
        forward_query(&mut target, query, override_param);
    }
    let records_visit = method == Method::GET;

    metrics::counter!(
        "edgesplit_assignments_total",
        "test_id" => test.id.clone(),
        "bucket_id" => bucket.to_string(),
        "source" => source.as_str(),
    )
    .increment(1);
    tracing::debug!(
        test_id = %test.id,
        bucket_id = %bucket,
        source = source.as_str(),
        "Redirecting to `{target}`"
    );

    let mut response_headers = HeaderMap::new();
    let location = HeaderValue::from_str(target.as_str()).map_err(|e| {
        Error::new(ErrorDetails::InvalidRedirectTarget {
            test_id: test.id.clone(),
            target: target.to_string(),
            message: e.to_string(),
        })
    })?;
    response_headers.insert(LOCATION, location);
    response_headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static(REDIRECT_CACHE_CONTROL),
    );
    if source.binds() && records_visit {
        session::bind(&mut response_headers, &test.id, &bucket)?;
    }

    if records_visit {
        app_state.analytics.dispatch(AnalyticsEvent::view(
            &test.id,
            bucket,
            client_id_from_headers(&headers),
        ));
    }

    Ok((StatusCode::FOUND, response_headers).into_response())
}

/// The bucket named by the debug override parameter, if it names one of
/// `test`'s buckets. The last occurrence of the parameter wins.
fn override_bucket(
    test: &TestDefinition,
    query_pairs: &[(String, String)],
    override_param: &str,
) -> Option<BucketId> {
    let (_, value) = query_pairs
        .iter()
        .rev()
        .find(|(name, _)| name == override_param)?;
    let bucket = test.bucket_from_token(value);
    if bucket.is_none() {
        tracing::info!(
            test_id = %test.id,
            "Ignoring `{override_param}={value}`: not a bucket of this test"
        );
    }
    bucket
}

async fn assign_new_visitor(app_state: &AppStateData, test: &TestDefinition) -> BucketId {
    let stats = if test.adaptive {
        load_bucket_stats(
            app_state.stats_store.as_ref(),
            test,
            app_state.config.stats.timeout,
        )
        .await
    } else {
        BucketStatsSnapshot::default()
    };
    // The thread-local RNG is not `Send`, so it must not live across an await
    let selection = select_bucket(test, &stats, &mut RandSource::thread());
    tracing::debug!(
        test_id = %test.id,
        bucket_id = %selection.bucket,
        policy = selection.policy.as_str(),
        "Assigned new visitor"
    );
    selection.bucket
}

/// The redirect target for `bucket`. A bucket that is no longer part of the
/// test (a stale binding) is served the control target, and the returned
/// bucket is `control` so that metrics and analytics agree with the redirect.
fn resolve_target(test: &TestDefinition, bucket: BucketId) -> (BucketId, &Url) {
    if let Some(target) = test.target_for(&bucket) {
        return (bucket, target);
    }
    tracing::warn!(
        test_id = %test.id,
        bucket_id = %bucket,
        "Visitor is bound to a bucket that is not part of the test; serving control"
    );
    metrics::counter!("edgesplit_stale_bindings_total", "test_id" => test.id.clone()).increment(1);
    (BucketId::Control, &test.control_target)
}

/// Appends the incoming query segments (minus the override) to `target`,
/// after any query the target already has. Segments are copied as sent, so
/// bare flags like `?gclid` and `%20` escapes survive unchanged.
fn forward_query(target: &mut Url, raw_query: &str, override_param: &str) {
    let forwarded = raw_query
        .split('&')
        .filter(|segment| !segment.is_empty() && !is_param(segment, override_param))
        .collect::<Vec<_>>()
        .join("&");
    if forwarded.is_empty() {
        return;
    }
    let query = match target.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{forwarded}"),
        _ => forwarded,
    };
    target.set_query(Some(&query));
}

/// Whether the raw `name[=value]` segment names the parameter `name`, after decoding.
fn is_param(segment: &str, name: &str) -> bool {
    let raw_name = segment.split_once('=').map_or(segment, |(raw_name, _)| raw_name);
    url::form_urlencoded::parse(raw_name.as_bytes())
        .next()
        .is_some_and(|(decoded, _)| decoded == name)
}
