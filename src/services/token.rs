use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::models::analysis::AnalysisType;

const SUFFIX_LEN: usize = 6;

/// Generate a client request token of the form `{type}_{media_id}_{suffix}`.
///
/// The provider deduplicates submissions carrying an identical token, so a
/// token must never be reused for a distinct submission.
pub fn generate(analysis_type: AnalysisType, media_id: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}_{}_{}", analysis_type, media_id, suffix)
}
