//! Candidate discovery: instance types, boot image, and spot price quotes.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::ProvisionError;
use crate::inventory::{
    FailureClass, FailureClassification, Image, InstanceTypeCandidate, InstanceTypeQuery,
    InventoryGateway, SpotOffer, ZoneOffering, bounded,
};
use crate::profile::ProvisioningProfile;

/// Default number of zones quoted concurrently for one candidate.
pub const DEFAULT_QUOTE_CONCURRENCY: usize = 8;

/// Raised when a provider price cannot be turned into a [`PriceQuote`].
#[derive(Clone, Debug, Error, PartialEq)]
#[error("invalid spot price {price} for {candidate_id} in {zone}")]
pub struct InvalidQuote {
    /// Candidate the price was quoted for.
    pub candidate_id: String,
    /// Zone the price was quoted in.
    pub zone: String,
    /// Offending price.
    pub price: f64,
}

/// Spot price of one candidate in one zone.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceQuote {
    candidate_id: String,
    zone: String,
    price: f64,
    origin_price: f64,
    currency: String,
    disk_category: String,
    quoted_at: DateTime<Utc>,
}

impl PriceQuote {
    /// Builds a quote, rejecting negative or non-finite prices.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidQuote`] when the offer's price is unusable.
    pub fn new(
        candidate_id: impl Into<String>,
        zone: impl Into<String>,
        offer: SpotOffer,
        quoted_at: DateTime<Utc>,
    ) -> Result<Self, InvalidQuote> {
        let candidate = candidate_id.into();
        let zone_id = zone.into();
        if !offer.price.is_finite() || offer.price < 0.0 {
            return Err(InvalidQuote {
                candidate_id: candidate,
                zone: zone_id,
                price: offer.price,
            });
        }
        Ok(Self {
            candidate_id: candidate,
            zone: zone_id,
            price: offer.price,
            origin_price: offer.origin_price,
            currency: offer.currency,
            disk_category: offer.disk_category,
            quoted_at,
        })
    }

    /// Instance type the quote applies to.
    #[must_use]
    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }

    /// Zone the quote applies to.
    #[must_use]
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Hourly spot price.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Hourly on-demand price.
    #[must_use]
    pub const fn origin_price(&self) -> f64 {
        self.origin_price
    }

    /// Currency code.
    #[must_use]
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// System disk category the price was obtained for.
    #[must_use]
    pub fn disk_category(&self) -> &str {
        &self.disk_category
    }

    /// Start of the discovery pass that produced the quote.
    #[must_use]
    pub const fn quoted_at(&self) -> DateTime<Utc> {
        self.quoted_at
    }
}

/// A candidate together with its per-zone quotes, sorted by zone.
#[derive(Clone, Debug, PartialEq)]
pub struct QuotedCandidate {
    /// The instance type.
    pub candidate: InstanceTypeCandidate,
    /// One quote per zone offering the type.
    pub quotes: Vec<PriceQuote>,
}

/// Queries the gateway for viable candidates and their prices.
#[derive(Debug)]
pub struct Discovery<'a, G> {
    gateway: &'a G,
    call_timeout: Duration,
    concurrency: usize,
}

impl<'a, G> Discovery<'a, G>
where
    G: InventoryGateway,
{
    /// Creates a discovery pass over `gateway`.
    #[must_use]
    pub const fn new(gateway: &'a G, call_timeout: Duration) -> Self {
        Self {
            gateway,
            call_timeout,
            concurrency: DEFAULT_QUOTE_CONCURRENCY,
        }
    }

    /// Overrides the per-candidate zone fan-out; zero is treated as one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Lists instance types satisfying both the CPU and memory ranges (and
    /// the allow-list, when one is configured).
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InventoryUnavailable`] when the gateway
    /// fails and [`ProvisionError::NoMatchingInstanceType`] when nothing
    /// qualifies.
    pub async fn discover(
        &self,
        profile: &ProvisioningProfile,
    ) -> Result<Vec<InstanceTypeCandidate>, ProvisionError<G::Error>> {
        let query = InstanceTypeQuery {
            cpu: profile.cpu,
            memory: profile.memory,
            instance_types: profile.instance_types.clone(),
        };
        let listed = bounded(
            "list_instance_types",
            self.call_timeout,
            self.gateway.list_instance_types(&query),
        )
        .await
        .map_err(|err| ProvisionError::unavailable("list_instance_types", err))?;

        let mut candidates: Vec<InstanceTypeCandidate> = listed
            .into_iter()
            .filter(|candidate| {
                profile.cpu.contains(candidate.cpu_cores)
                    && profile.memory.contains(candidate.memory_gib)
                    && (profile.instance_types.is_empty()
                        || profile.instance_types.contains(&candidate.id))
            })
            .collect();
        candidates.sort_by(|left, right| left.id.cmp(&right.id));
        candidates.dedup_by(|left, right| left.id == right.id);

        if candidates.is_empty() {
            return Err(ProvisionError::NoMatchingInstanceType {
                cpu: profile.cpu.to_string(),
                memory: profile.memory.to_string(),
            });
        }
        info!(count = candidates.len(), "discovered instance types");
        Ok(candidates)
    }

    /// Resolves the newest image matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::ImageNotFound`] when nothing matches.
    pub async fn resolve_image(&self, pattern: &str) -> Result<Image, ProvisionError<G::Error>> {
        let images = bounded(
            "find_images",
            self.call_timeout,
            self.gateway.find_images(pattern),
        )
        .await
        .map_err(|err| ProvisionError::unavailable("find_images", err))?;

        let newest = images
            .into_iter()
            .max_by(|left, right| {
                left.created_at
                    .cmp(&right.created_at)
                    .then_with(|| right.id.cmp(&left.id))
            })
            .ok_or_else(|| ProvisionError::ImageNotFound {
                pattern: pattern.to_owned(),
            })?;
        info!(image_id = %newest.id, image_name = %newest.name, "resolved image");
        Ok(newest)
    }

    /// Lists the region's zones with their spot offerings.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InventoryUnavailable`] when the gateway
    /// fails.
    pub async fn zone_offerings(
        &self,
        region: &str,
    ) -> Result<Vec<ZoneOffering>, ProvisionError<G::Error>> {
        bounded("spot_zones", self.call_timeout, self.gateway.spot_zones(region))
            .await
            .map_err(|err| ProvisionError::unavailable("spot_zones", err))
    }

    /// Quotes `candidate` in every zone of `region` that offers it.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InventoryUnavailable`] when the gateway
    /// fails fatally.
    pub async fn quote(
        &self,
        candidate: &InstanceTypeCandidate,
        region: &str,
    ) -> Result<Vec<PriceQuote>, ProvisionError<G::Error>> {
        let offerings = self.zone_offerings(region).await?;
        self.quote_in(candidate, &offerings, Utc::now()).await
    }

    /// Quotes `candidate` in the given zones, fetching up to the configured
    /// number of zones concurrently. The result is sorted by zone.
    ///
    /// A zone without an offering, or whose quote fails transiently, is
    /// absent from the result.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InventoryUnavailable`] when a quote fails
    /// fatally.
    pub async fn quote_in(
        &self,
        candidate: &InstanceTypeCandidate,
        offerings: &[ZoneOffering],
        quoted_at: DateTime<Utc>,
    ) -> Result<Vec<PriceQuote>, ProvisionError<G::Error>> {
        let zones = offerings
            .iter()
            .filter(|offering| offering.offers(&candidate.id))
            .map(|offering| offering.zone.as_str());

        let results: Vec<_> = stream::iter(zones)
            .map(|zone| async move {
                let offer = bounded(
                    "spot_price",
                    self.call_timeout,
                    self.gateway.spot_price(&candidate.id, zone),
                )
                .await;
                (zone, offer)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut quotes = Vec::with_capacity(results.len());
        for (zone, result) in results {
            match result {
                Ok(Some(offer)) => match PriceQuote::new(&candidate.id, zone, offer, quoted_at) {
                    Ok(quote) => quotes.push(quote),
                    Err(err) => warn!(error = %err, "discarding quote"),
                },
                Ok(None) => debug!(instance_type = %candidate.id, zone, "no spot offering"),
                Err(err) if err.classify() == FailureClass::Transient => {
                    warn!(instance_type = %candidate.id, zone, error = %err, "skipping zone");
                }
                Err(err) => return Err(ProvisionError::unavailable("spot_price", err)),
            }
        }
        quotes.sort_by(|left, right| left.zone.cmp(&right.zone));
        Ok(quotes)
    }

    /// Quotes every candidate against one zone listing, dropping candidates
    /// no zone offers. All quotes share the pass timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InventoryUnavailable`] when the gateway
    /// fails fatally.
    pub async fn quote_all(
        &self,
        candidates: Vec<InstanceTypeCandidate>,
        region: &str,
    ) -> Result<Vec<QuotedCandidate>, ProvisionError<G::Error>> {
        let offerings = self.zone_offerings(region).await?;
        let quoted_at = Utc::now();
        let mut quoted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let quotes = self.quote_in(&candidate, &offerings, quoted_at).await?;
            if quotes.is_empty() {
                debug!(instance_type = %candidate.id, "dropping candidate without spot offers");
                continue;
            }
            quoted.push(QuotedCandidate { candidate, quotes });
        }
        info!(viable = quoted.len(), "quoted candidates");
        Ok(quoted)
    }
}
