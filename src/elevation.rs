//! Elevation profiles.
//!
//! Resamples a route polyline by arc length and looks each sample up
//! against an elevation provider. Providers are pluggable: the HTTP
//! one talks to an open elevation API with retries, tests inject a
//! fake. A provider returning `None` for a point keeps the sample in
//! the profile with a null elevation; only gain/loss accumulation
//! skips it.

use crate::Deadline;
use crate::errors::{EngineError, EngineResult};
use crate::models::Waypoint;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElevationSample {
    pub distance_m: f64,
    pub elevation_m: Option<f64>,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElevationStats {
    pub min_elevation: Option<f64>,
    pub max_elevation: Option<f64>,
    pub total_gain: f64,
    pub total_loss: f64,
}

/// Stored on the route as a JSONB attribute.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElevationProfile {
    pub samples: Vec<ElevationSample>,
    pub stats: ElevationStats,
    pub resolution_m: f64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub trait ElevationProvider {
    /// Elevation in metres above sea level, `None` where the provider
    /// has no data for the coordinate.
    fn elevation(
        &self,
        lat: f64,
        lng: f64,
    ) -> impl std::future::Future<Output = EngineResult<Option<f64>>> + Send;
}

/// Resample a polyline by arc length: one sample every `resolution_m`
/// metres plus the final endpoint. Returns `(distance_m, lat, lng)`
/// triples with monotonically non-decreasing distances.
pub fn resample_polyline(points: &[Waypoint], resolution_m: f64) -> Vec<(f64, f64, f64)> {
    if points.is_empty() {
        return Vec::new();
    }
    if points.len() == 1 || resolution_m <= 0.0 {
        return vec![(0.0, points[0].lat, points[0].lng)];
    }

    // cumulative arc length at each vertex
    let mut cumulative = vec![0.0f64];
    for pair in points.windows(2) {
        let d = crate::haversine_m(pair[0].lat, pair[0].lng, pair[1].lat, pair[1].lng);
        cumulative.push(cumulative[cumulative.len() - 1] + d);
    }
    let total = cumulative[cumulative.len() - 1];

    let mut samples = Vec::new();
    let mut target = 0.0f64;
    let mut vertex = 0usize;
    while target < total {
        while vertex + 1 < cumulative.len() && cumulative[vertex + 1] < target {
            vertex += 1;
        }
        let seg_start = cumulative[vertex];
        let seg_len = cumulative[vertex + 1] - seg_start;
        let t = if seg_len > 0.0 {
            (target - seg_start) / seg_len
        } else {
            0.0
        };
        let a = &points[vertex];
        let b = &points[vertex + 1];
        samples.push((
            target,
            a.lat + (b.lat - a.lat) * t,
            a.lng + (b.lng - a.lng) * t,
        ));
        target += resolution_m;
    }

    // final endpoint, unless the last stride landed on it
    let last = &points[points.len() - 1];
    let endpoint_missing = samples
        .last()
        .map(|(d, _, _)| (total - d) > 1e-6)
        .unwrap_or(true);
    if endpoint_missing {
        samples.push((total, last.lat, last.lng));
    }

    samples
}

pub fn compute_stats(samples: &[ElevationSample]) -> ElevationStats {
    let mut min_elevation: Option<f64> = None;
    let mut max_elevation: Option<f64> = None;
    let mut total_gain = 0.0;
    let mut total_loss = 0.0;
    let mut previous: Option<f64> = None;

    for sample in samples {
        let e = match sample.elevation_m {
            Some(e) => e,
            None => continue, // null samples stay out of the accumulation
        };
        min_elevation = Some(min_elevation.map_or(e, |m: f64| m.min(e)));
        max_elevation = Some(max_elevation.map_or(e, |m: f64| m.max(e)));
        if let Some(prev) = previous {
            let delta = e - prev;
            if delta > 0.0 {
                total_gain += delta;
            } else {
                total_loss += -delta;
            }
        }
        previous = Some(e);
    }

    ElevationStats {
        min_elevation,
        max_elevation,
        total_gain,
        total_loss,
    }
}

/// Build the full profile for a polyline. The per-sample lookup loop
/// is the cooperative cancellation point for this component.
pub async fn build_profile<P: ElevationProvider>(
    provider: &P,
    points: &[Waypoint],
    resolution_m: f64,
    deadline: Option<Deadline>,
) -> EngineResult<ElevationProfile> {
    if points.len() < 2 {
        return Err(EngineError::InvalidGeometry(
            "elevation profile needs a polyline with at least 2 points".to_string(),
        ));
    }

    let positions = resample_polyline(points, resolution_m);
    let mut samples = Vec::with_capacity(positions.len());

    for (distance_m, lat, lng) in positions {
        if let Some(deadline) = deadline {
            if deadline.expired() {
                return Err(EngineError::Timeout(deadline.budget_secs()));
            }
        }
        let elevation_m = lookup_with_retry(provider, lat, lng).await?;
        samples.push(ElevationSample {
            distance_m,
            elevation_m,
            lat,
            lng,
        });
    }

    let stats = compute_stats(&samples);
    Ok(ElevationProfile {
        samples,
        stats,
        resolution_m,
        updated_at: chrono::Utc::now(),
    })
}

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 250;

/// The provider is assumed idempotent, so transient failures retry
/// with exponential backoff up to three attempts.
async fn lookup_with_retry<P: ElevationProvider>(
    provider: &P,
    lat: f64,
    lng: f64,
) -> EngineResult<Option<f64>> {
    let mut last_error = None;
    for attempt in 0..RETRY_ATTEMPTS {
        match provider.elevation(lat, lng).await {
            Ok(value) => return Ok(value),
            Err(EngineError::ExternalProvider(msg)) => {
                log::warn!(
                    "elevation lookup failed (attempt {}/{}): {}",
                    attempt + 1,
                    RETRY_ATTEMPTS,
                    msg
                );
                last_error = Some(EngineError::ExternalProvider(msg));
                let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_error
        .unwrap_or_else(|| EngineError::ExternalProvider("elevation lookup failed".to_string())))
}

/// Open-Elevation style HTTP provider.
pub struct HttpElevationProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    results: Vec<LookupResult>,
}

#[derive(Deserialize)]
struct LookupResult {
    elevation: Option<f64>,
}

impl HttpElevationProvider {
    pub fn new(base_url: &str) -> HttpElevationProvider {
        HttpElevationProvider {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl ElevationProvider for HttpElevationProvider {
    async fn elevation(&self, lat: f64, lng: f64) -> EngineResult<Option<f64>> {
        let url = format!(
            "{}/api/v1/lookup?locations={},{}",
            self.base_url, lat, lng
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExternalProvider(format!("elevation request: {}", e)))?;
        if !response.status().is_success() {
            return Err(EngineError::ExternalProvider(format!(
                "elevation request: HTTP {}",
                response.status()
            )));
        }
        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ExternalProvider(format!("elevation response: {}", e)))?;
        Ok(body.results.first().and_then(|r| r.elevation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat ~1 km west-east polyline near Ürgüp.
    fn one_km_line() -> Vec<Waypoint> {
        // 0.0115 degrees of longitude at lat 38.6431 is ~1000 m
        vec![
            Waypoint::new(38.6431, 34.8213),
            Waypoint::new(38.6431, 34.8328),
        ]
    }

    struct FakeProvider {
        /// elevation per sample index, None = provider has no data
        responses: Vec<Option<f64>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl FakeProvider {
        fn new(responses: Vec<Option<f64>>) -> FakeProvider {
            FakeProvider {
                responses,
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl ElevationProvider for FakeProvider {
        async fn elevation(&self, _lat: f64, _lng: f64) -> EngineResult<Option<f64>> {
            let idx = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.responses.get(idx).copied().flatten())
        }
    }

    struct FlakyProvider {
        failures_before_success: std::sync::atomic::AtomicUsize,
    }

    impl ElevationProvider for FlakyProvider {
        async fn elevation(&self, _lat: f64, _lng: f64) -> EngineResult<Option<f64>> {
            let remaining = self
                .failures_before_success
                .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            if remaining > 0 {
                Err(EngineError::ExternalProvider("transient".to_string()))
            } else {
                Ok(Some(1100.0))
            }
        }
    }

    #[test]
    fn resampling_one_km_at_100m() {
        let samples = resample_polyline(&one_km_line(), 100.0);
        assert!(
            samples.len() == 10 || samples.len() == 11 || samples.len() == 12,
            "got {} samples",
            samples.len()
        );
        // monotonic, spacing bounded by resolution + tolerance
        for pair in samples.windows(2) {
            assert!(pair[1].0 >= pair[0].0);
            assert!(pair[1].0 - pair[0].0 <= 100.0 + 1.0);
        }
        assert!((samples[0].0 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn gain_loss_accumulation() {
        let samples: Vec<ElevationSample> = [1060.0, 1070.0, 1065.0, 1080.0]
            .iter()
            .enumerate()
            .map(|(i, e)| ElevationSample {
                distance_m: i as f64 * 100.0,
                elevation_m: Some(*e),
                lat: 38.64,
                lng: 34.82,
            })
            .collect();
        let stats = compute_stats(&samples);
        assert_eq!(stats.min_elevation, Some(1060.0));
        assert_eq!(stats.max_elevation, Some(1080.0));
        assert!((stats.total_gain - 25.0).abs() < 1e-9);
        assert!((stats.total_loss - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn null_sample_kept_but_excluded_from_stats() {
        // 11 samples for the 1 km line; index 5 has no data.
        let mut responses = vec![Some(1060.0); 12];
        responses[5] = None;
        let provider = FakeProvider::new(responses);

        let profile = build_profile(&provider, &one_km_line(), 100.0, None)
            .await
            .unwrap();

        assert!(profile.samples.len() >= 10 && profile.samples.len() <= 12);
        assert!(profile.samples[5].elevation_m.is_none());
        // flat elsewhere: the null gap must not fabricate gain/loss
        assert_eq!(profile.stats.total_gain, 0.0);
        assert_eq!(profile.stats.total_loss, 0.0);
        assert!(profile.stats.total_gain >= 0.0 && profile.stats.total_loss >= 0.0);
        let (min, max) = (
            profile.stats.min_elevation.unwrap(),
            profile.stats.max_elevation.unwrap(),
        );
        assert!(min <= max);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let provider = FlakyProvider {
            failures_before_success: std::sync::atomic::AtomicUsize::new(2),
        };
        let result = lookup_with_retry(&provider, 38.64, 34.82).await.unwrap();
        assert_eq!(result, Some(1100.0));
    }

    #[tokio::test]
    async fn expired_deadline_reports_the_configured_budget() {
        let provider = FakeProvider::new(vec![Some(1060.0); 12]);
        let deadline = Deadline::expiring_at(
            std::time::Instant::now() - Duration::from_secs(1),
            Duration::from_secs(12),
        );
        match build_profile(&provider, &one_km_line(), 100.0, Some(deadline)).await {
            Err(EngineError::Timeout(secs)) => assert_eq!(secs, 12),
            other => panic!("expected Timeout, got {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn degenerate_polyline_rejected() {
        let provider = FakeProvider::new(vec![]);
        assert!(matches!(
            build_profile(&provider, &[Waypoint::new(38.6, 34.9)], 100.0, None).await,
            Err(EngineError::InvalidGeometry(_))
        ));
    }
}
