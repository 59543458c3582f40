//! Location resolution.
//!
//! [`LocationResolver::resolve`] never fails. It walks a fallback chain
//! (fresh last-known fix, new fix, stale fix, GPS-only fix) and ends in a
//! fixed sentinel when nothing worked. Every string it returns is non-empty.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::bounded::{run_bounded, Bounded, Deadline};
use crate::config::LocationConfig;
use crate::error::{Error, Result};

/// Placeholder stored while a location is still being resolved.
pub const RESOLVING: &str = "Obtendo localização...";
/// No location could be determined.
pub const UNAVAILABLE: &str = "Localização não disponível";
/// Location permission is not granted.
pub const NO_PERMISSION: &str = "Localização não disponível - Sem permissão";
/// Permission granted but no fix of any kind.
pub const NO_SIGNAL: &str = "GPS sem sinal";
/// Appended to coordinates that came from an old fix.
pub const STALE_SUFFIX: &str = " (última conhecida)";

/// Whether a stored location should be resolved again.
#[must_use]
pub fn needs_resolution(location: Option<&str>) -> bool {
    match location.map(str::trim) {
        None => true,
        Some(l) => l.is_empty() || l == RESOLVING || l == UNAVAILABLE || l == NO_SIGNAL,
    }
}

/// A position fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// When the fix was taken.
    pub taken_at: DateTime<Utc>,
}

impl Fix {
    /// Raw coordinate form, six decimal places.
    #[must_use]
    pub fn coordinates(&self) -> String {
        format!("Lat: {:.6}, Lng: {:.6}", self.latitude, self.longitude)
    }

    fn is_fresh(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        (now - self.taken_at)
            .to_std()
            .map_or(true, |age| age < freshness)
    }
}

/// Source of position fixes.
#[async_trait]
pub trait LocationProvider: Send + Sync + fmt::Debug {
    /// Whether location permission is currently granted.
    fn has_permission(&self) -> bool;

    /// The last fix the device knows about, of any age.
    async fn last_known(&self) -> Option<Fix>;

    /// A new high-accuracy fix.
    async fn current_fix(&self) -> Option<Fix>;

    /// A fix from satellite positioning alone, with no network assistance.
    async fn gps_only_fix(&self) -> Option<Fix>;
}

/// Reverse geocoding.
#[async_trait]
pub trait Geocoder: Send + Sync + fmt::Debug {
    /// Look up the address of a fix.
    async fn reverse(&self, fix: &Fix) -> Result<Address>;
}

/// Address parts returned by a geocoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    /// Street.
    pub road: Option<String>,
    /// Street number.
    pub house_number: Option<String>,
    /// Neighbourhood.
    pub suburb: Option<String>,
    /// City.
    pub city: Option<String>,
    /// State.
    pub state: Option<String>,
}

impl Address {
    /// "road, number, suburb, city - state", skipping missing parts.
    ///
    /// Returns `None` when every part is missing.
    #[must_use]
    pub fn format(&self) -> Option<String> {
        fn part(p: &Option<String>) -> Option<&str> {
            p.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }

        let mut out = String::new();
        if let Some(road) = part(&self.road) {
            out.push_str(road);
            if let Some(number) = part(&self.house_number) {
                out.push_str(", ");
                out.push_str(number);
            }
        }
        for p in [part(&self.suburb), part(&self.city)].into_iter().flatten() {
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(p);
        }
        if let Some(state) = part(&self.state) {
            if !out.is_empty() {
                out.push_str(" - ");
            }
            out.push_str(state);
        }

        (!out.is_empty()).then_some(out)
    }
}

/// Budgets used inside the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Maximum age of a last-known fix that is used without asking for a new one.
    pub freshness: Duration,
    /// Budget for one reverse-geocoding lookup.
    pub geocode_timeout: Duration,
    /// Budget for the GPS-only attempt, capped by what is left of the caller's budget.
    pub gps_only_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(300),
            geocode_timeout: Duration::from_secs(3),
            gps_only_timeout: Duration::from_secs(5),
        }
    }
}

/// Resolves the collection location of a submission.
#[derive(Debug, Clone)]
pub struct LocationResolver {
    provider: Arc<dyn LocationProvider>,
    geocoder: Arc<dyn Geocoder>,
    settings: ResolverSettings,
}

impl LocationResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        geocoder: Arc<dyn Geocoder>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            provider,
            geocoder,
            settings,
        }
    }

    /// Resolve a human-readable location within `budget`.
    ///
    /// The whole chain shares one deadline, so the call returns a terminal
    /// answer (at worst [`NO_SIGNAL`]) shortly after `budget` elapses.
    pub async fn resolve(&self, budget: Duration) -> String {
        if !self.provider.has_permission() {
            debug!("Location permission not granted");
            return NO_PERMISSION.to_string();
        }

        let deadline = Deadline::after(budget);
        let last = run_bounded(
            "location.last_known",
            deadline.remaining(),
            self.provider.last_known(),
        )
        .await
        .flatten();

        if let Some(fix) = last.filter(|f| f.is_fresh(Utc::now(), self.settings.freshness)) {
            debug!("Using recent last-known fix");
            return self.describe(&fix, &deadline).await;
        }

        if !deadline.is_expired() {
            let current = run_bounded(
                "location.current_fix",
                deadline.remaining(),
                self.provider.current_fix(),
            )
            .await
            .flatten();
            if let Some(fix) = current {
                return self.describe(&fix, &deadline).await;
            }
        }

        if let Some(fix) = last {
            debug!("New fix unavailable, falling back to last-known fix");
            let described = self.describe(&fix, &deadline).await;
            return if described.contains("Lat:") {
                format!("{described}{STALE_SUFFIX}")
            } else {
                described
            };
        }

        let gps_budget = deadline.clamp(self.settings.gps_only_timeout);
        if !gps_budget.is_zero() {
            let gps = run_bounded("location.gps_only", gps_budget, self.provider.gps_only_fix())
                .await
                .flatten();
            if let Some(fix) = gps {
                return fix.coordinates();
            }
        }

        warn!("No position fix available");
        NO_SIGNAL.to_string()
    }

    /// Geocoded address of `fix`, or its coordinates.
    async fn describe(&self, fix: &Fix, deadline: &Deadline) -> String {
        let budget = deadline.clamp(self.settings.geocode_timeout);
        if budget.is_zero() {
            return fix.coordinates();
        }

        match run_bounded("location.geocode", budget, self.geocoder.reverse(fix)).await {
            Bounded::Completed(Ok(address)) => address.format().unwrap_or_else(|| fix.coordinates()),
            Bounded::Completed(Err(e)) => {
                debug!(error = %e, "Reverse geocoding failed");
                fix.coordinates()
            }
            Bounded::TimedOut => fix.coordinates(),
        }
    }
}

/// Provider backed by a fixed position from configuration.
///
/// Hosts without positioning hardware configure their coordinates once; the
/// fix is reported as freshly taken on every call.
#[derive(Debug, Clone, Default)]
pub struct StaticLocationProvider {
    permission: bool,
    position: Option<(f64, f64)>,
}

impl StaticLocationProvider {
    /// Build from the `location` configuration section.
    #[must_use]
    pub fn from_config(config: &LocationConfig) -> Self {
        Self {
            permission: config.permission_granted,
            position: config.latitude.zip(config.longitude),
        }
    }

    fn fix(&self) -> Option<Fix> {
        self.position.map(|(latitude, longitude)| Fix {
            latitude,
            longitude,
            taken_at: Utc::now(),
        })
    }
}

#[async_trait]
impl LocationProvider for StaticLocationProvider {
    fn has_permission(&self) -> bool {
        self.permission
    }

    async fn last_known(&self) -> Option<Fix> {
        self.fix()
    }

    async fn current_fix(&self) -> Option<Fix> {
        self.fix()
    }

    async fn gps_only_fix(&self) -> Option<Fix> {
        self.fix()
    }
}

/// Geocoder used when no service is configured. Always fails, so callers
/// fall back to coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeocoder;

#[async_trait]
impl Geocoder for NoGeocoder {
    async fn reverse(&self, _fix: &Fix) -> Result<Address> {
        Err(Error::internal("no geocoder configured"))
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    road: Option<String>,
    house_number: Option<String>,
    suburb: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
}

impl From<NominatimAddress> for Address {
    fn from(a: NominatimAddress) -> Self {
        Self {
            road: a.road,
            house_number: a.house_number,
            suburb: a.suburb,
            city: a.city.or(a.town).or(a.village),
            state: a.state,
        }
    }
}

/// Reverse geocoding over a Nominatim-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    base_url: String,
    client: reqwest::Client,
}

impl NominatimGeocoder {
    /// Create a geocoder for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("truckcheck/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, fix: &Fix) -> Result<Address> {
        let url = format!("{}/reverse", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", fix.latitude.to_string()),
                ("lon", fix.longitude.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Remote {
                status: response.status().as_u16(),
                message: "reverse geocoding rejected".to_string(),
            });
        }

        let body: NominatimResponse = response.json().await?;
        Ok(body.address.map(Address::from).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGeocoder, FakeLocationProvider};

    fn fix_aged(minutes: i64) -> Fix {
        Fix {
            latitude: -25.428_954,
            longitude: -49.267_137,
            taken_at: Utc::now() - chrono::Duration::minutes(minutes),
        }
    }

    fn address() -> Address {
        Address {
            road: Some("Rua XV de Novembro".to_string()),
            house_number: Some("100".to_string()),
            suburb: Some("Centro".to_string()),
            city: Some("Curitiba".to_string()),
            state: Some("Paraná".to_string()),
        }
    }

    fn resolver(provider: FakeLocationProvider, geocoder: FakeGeocoder) -> LocationResolver {
        LocationResolver::new(
            Arc::new(provider),
            Arc::new(geocoder),
            ResolverSettings {
                freshness: Duration::from_secs(300),
                geocode_timeout: Duration::from_millis(100),
                gps_only_timeout: Duration::from_millis(100),
            },
        )
    }

    #[test]
    fn test_coordinates_format() {
        assert_eq!(
            fix_aged(0).coordinates(),
            "Lat: -25.428954, Lng: -49.267137"
        );
    }

    #[test]
    fn test_address_format() {
        assert_eq!(
            address().format().unwrap(),
            "Rua XV de Novembro, 100, Centro, Curitiba - Paraná"
        );

        let partial = Address {
            house_number: Some("100".to_string()),
            city: Some("Curitiba".to_string()),
            state: Some("PR".to_string()),
            ..Address::default()
        };
        assert_eq!(partial.format().unwrap(), "Curitiba - PR");
        assert_eq!(Address::default().format(), None);
    }

    #[test]
    fn test_needs_resolution() {
        assert!(needs_resolution(None));
        assert!(needs_resolution(Some("  ")));
        assert!(needs_resolution(Some(RESOLVING)));
        assert!(needs_resolution(Some(UNAVAILABLE)));
        assert!(needs_resolution(Some(NO_SIGNAL)));
        assert!(!needs_resolution(Some(NO_PERMISSION)));
        assert!(!needs_resolution(Some("Curitiba - PR")));
    }

    #[tokio::test]
    async fn test_no_permission_short_circuits() {
        let provider = FakeLocationProvider {
            permission: false,
            last_known: Some(fix_aged(0)),
            ..FakeLocationProvider::default()
        };
        let resolver = resolver(provider, FakeGeocoder::failing());
        assert_eq!(resolver.resolve(Duration::from_secs(5)).await, NO_PERMISSION);
    }

    #[tokio::test]
    async fn test_no_fix_of_any_kind() {
        let resolver = resolver(FakeLocationProvider::default(), FakeGeocoder::failing());
        assert_eq!(resolver.resolve(Duration::from_millis(200)).await, NO_SIGNAL);
    }

    #[tokio::test]
    async fn test_fresh_last_known_is_geocoded() {
        let provider = FakeLocationProvider {
            last_known: Some(fix_aged(1)),
            ..FakeLocationProvider::default()
        };
        let resolver = resolver(provider, FakeGeocoder::returning(address()));
        assert_eq!(
            resolver.resolve(Duration::from_secs(1)).await,
            "Rua XV de Novembro, 100, Centro, Curitiba - Paraná"
        );
    }

    #[tokio::test]
    async fn test_geocode_failure_falls_back_to_coordinates() {
        let provider = FakeLocationProvider {
            current: Some(fix_aged(0)),
            ..FakeLocationProvider::default()
        };
        let resolver = resolver(provider, FakeGeocoder::failing());
        assert_eq!(
            resolver.resolve(Duration::from_secs(1)).await,
            "Lat: -25.428954, Lng: -49.267137"
        );
    }

    #[tokio::test]
    async fn test_slow_geocoder_falls_back_to_coordinates() {
        let provider = FakeLocationProvider {
            current: Some(fix_aged(0)),
            ..FakeLocationProvider::default()
        };
        let geocoder = FakeGeocoder {
            delay: Duration::from_secs(5),
            ..FakeGeocoder::returning(address())
        };
        let resolver = resolver(provider, geocoder);
        assert!(resolver
            .resolve(Duration::from_secs(1))
            .await
            .starts_with("Lat: "));
    }

    #[tokio::test]
    async fn test_stale_fix_is_marked() {
        let provider = FakeLocationProvider {
            last_known: Some(fix_aged(30)),
            ..FakeLocationProvider::default()
        };
        let resolver = resolver(provider, FakeGeocoder::failing());
        assert_eq!(
            resolver.resolve(Duration::from_millis(300)).await,
            "Lat: -25.428954, Lng: -49.267137 (última conhecida)"
        );
    }

    #[tokio::test]
    async fn test_stale_fix_with_address_is_not_marked() {
        let provider = FakeLocationProvider {
            last_known: Some(fix_aged(30)),
            ..FakeLocationProvider::default()
        };
        let resolver = resolver(provider, FakeGeocoder::returning(address()));
        assert_eq!(
            resolver.resolve(Duration::from_millis(300)).await,
            "Rua XV de Novembro, 100, Centro, Curitiba - Paraná"
        );
    }

    #[tokio::test]
    async fn test_gps_only_fix_returns_coordinates() {
        let provider = FakeLocationProvider {
            gps_only: Some(fix_aged(0)),
            ..FakeLocationProvider::default()
        };
        let resolver = resolver(provider, FakeGeocoder::returning(address()));
        assert_eq!(
            resolver.resolve(Duration::from_millis(200)).await,
            "Lat: -25.428954, Lng: -49.267137"
        );
    }

    #[tokio::test]
    async fn test_slow_provider_is_bounded() {
        let provider = FakeLocationProvider {
            current: Some(fix_aged(0)),
            delay: Duration::from_secs(10),
            ..FakeLocationProvider::default()
        };
        let resolver = resolver(provider, FakeGeocoder::failing());
        let started = std::time::Instant::now();
        let location = resolver.resolve(Duration::from_millis(200)).await;
        assert_eq!(location, NO_SIGNAL);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_gps_only_step_stays_within_budget() {
        let provider = FakeLocationProvider {
            gps_only: Some(fix_aged(0)),
            delay: Duration::from_millis(150),
            ..FakeLocationProvider::default()
        };
        let resolver = LocationResolver::new(
            Arc::new(provider),
            Arc::new(FakeGeocoder::failing()),
            ResolverSettings {
                gps_only_timeout: Duration::from_secs(10),
                ..ResolverSettings::default()
            },
        );

        let started = std::time::Instant::now();
        let location = resolver.resolve(Duration::from_millis(200)).await;
        assert_eq!(location, NO_SIGNAL);
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_static_provider() {
        let config = LocationConfig {
            latitude: Some(-25.5),
            longitude: Some(-49.3),
            ..LocationConfig::default()
        };
        let provider = StaticLocationProvider::from_config(&config);
        assert!(provider.has_permission());
        let fix = provider.current_fix().await.unwrap();
        assert_eq!(fix.coordinates(), "Lat: -25.500000, Lng: -49.300000");

        let unset = StaticLocationProvider::from_config(&LocationConfig::default());
        assert!(unset.last_known().await.is_none());
    }

    #[tokio::test]
    async fn test_no_geocoder_always_fails() {
        assert!(NoGeocoder.reverse(&fix_aged(0)).await.is_err());
    }

    #[test]
    fn test_nominatim_address_mapping() {
        let json = r#"{"address": {"road": "Av. Brasil", "town": "Foz", "state": "PR"}}"#;
        let body: NominatimResponse = serde_json::from_str(json).unwrap();
        let address = Address::from(body.address.unwrap());
        assert_eq!(address.format().unwrap(), "Av. Brasil, Foz - PR");
    }
}
