use axum::Json;
use axum::extract::{Path, State};

use crate::error::{Error, ErrorDetails};
use crate::experimentation::{
    BucketStatsSnapshot, DISPLAY_PROBABILITY_DRAWS, DisplayProbabilities, RandSource,
    display_probabilities, load_bucket_stats,
};
use crate::utils::gateway::AppState;

/// `GET /internal/tests/{test_id}/probabilities`
///
/// The chance that a new visitor is assigned to each bucket right now. Read-only.
pub async fn probabilities_handler(
    State(app_state): AppState,
    Path(test_id): Path<String>,
) -> Result<Json<DisplayProbabilities>, Error> {
    let test = app_state
        .config
        .tests
        .get(&test_id)
        .ok_or_else(|| Error::new(ErrorDetails::UnknownTest { test_id }))?;

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

    let probabilities = display_probabilities(
        test,
        &stats,
        &mut RandSource::thread(),
        DISPLAY_PROBABILITY_DRAWS,
    );
    Ok(Json(probabilities))
}
