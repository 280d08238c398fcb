//! Tracking token codec - signed (campaign, subscriber) pairs in tracking URLs

use gazette_common::config::TrackingConfig;
use gazette_common::types::{CampaignId, SubscriberId};
use gazette_common::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of the HMAC kept in the `sig` parameter
const SIGNATURE_BYTES: usize = 16;

pub const OPEN_PATH: &str = "track/open";
pub const CLICK_PATH: &str = "track/click";
pub const UNSUBSCRIBE_PATH: &str = "track/unsubscribe";

/// Decoded and verified tracking identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingToken {
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
}

/// Encodes and verifies tracking URLs
#[derive(Clone)]
pub struct TrackingCodec {
    mac: HmacSha256,
    open_endpoint: Url,
    click_endpoint: Url,
    unsubscribe_endpoint: Url,
    fallback_url: String,
}

impl TrackingCodec {
    pub fn new(config: &TrackingConfig) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(config.secret.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid tracking secret: {}", e)))?;

        let mut base = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("Invalid tracking base URL: {}", e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let endpoint = |path: &str| {
            base.join(path)
                .map_err(|e| Error::Config(format!("Invalid tracking endpoint {}: {}", path, e)))
        };

        Ok(Self {
            mac,
            open_endpoint: endpoint(OPEN_PATH)?,
            click_endpoint: endpoint(CLICK_PATH)?,
            unsubscribe_endpoint: endpoint(UNSUBSCRIBE_PATH)?,
            fallback_url: config.fallback_url().to_string(),
        })
    }

    /// Truncated hex HMAC over the pair
    pub fn sign(&self, campaign_id: CampaignId, subscriber_id: SubscriberId) -> String {
        let mut mac = self.mac.clone();
        mac.update(Self::payload(campaign_id, subscriber_id).as_bytes());
        let digest = mac.finalize().into_bytes();
        hex::encode(&digest[..SIGNATURE_BYTES])
    }

    /// Parse and verify raw query parameters
    pub fn decode(&self, campaign: &str, subscriber: &str, sig: &str) -> Result<TrackingToken> {
        let campaign_id = Uuid::parse_str(campaign)
            .map_err(|_| Error::Tracking(format!("Malformed campaign id: {}", campaign)))?;
        let subscriber_id = Uuid::parse_str(subscriber)
            .map_err(|_| Error::Tracking(format!("Malformed subscriber id: {}", subscriber)))?;

        let tag = hex::decode(sig).map_err(|_| Error::Tracking("Malformed signature".into()))?;
        if tag.len() != SIGNATURE_BYTES {
            return Err(Error::Tracking("Malformed signature".into()));
        }

        let mut mac = self.mac.clone();
        mac.update(Self::payload(campaign_id, subscriber_id).as_bytes());
        mac.verify_truncated_left(&tag)
            .map_err(|_| Error::Tracking("Signature mismatch".into()))?;

        Ok(TrackingToken {
            campaign_id,
            subscriber_id,
        })
    }

    pub fn pixel_url(&self, campaign_id: CampaignId, subscriber_id: SubscriberId) -> String {
        self.signed(&self.open_endpoint, campaign_id, subscriber_id, None)
    }

    pub fn click_url(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        destination: &str,
    ) -> String {
        self.signed(
            &self.click_endpoint,
            campaign_id,
            subscriber_id,
            Some(destination),
        )
    }

    pub fn unsubscribe_url(&self, campaign_id: CampaignId, subscriber_id: SubscriberId) -> String {
        self.signed(&self.unsubscribe_endpoint, campaign_id, subscriber_id, None)
    }

    /// Where a click goes: the destination as written when it parses as an
    /// absolute http(s) URL, the configured fallback otherwise
    pub fn redirect_target(&self, destination: Option<&str>) -> String {
        destination
            .map(str::trim)
            .filter(|raw| {
                Url::parse(raw).is_ok_and(|url| {
                    matches!(url.scheme(), "http" | "https") && url.has_host()
                })
            })
            .map(str::to_string)
            .unwrap_or_else(|| self.fallback_url.clone())
    }

    fn signed(
        &self,
        endpoint: &Url,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        destination: Option<&str>,
    ) -> String {
        let mut url = endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("c", &campaign_id.to_string())
                .append_pair("s", &subscriber_id.to_string())
                .append_pair("sig", &self.sign(campaign_id, subscriber_id));
            if let Some(destination) = destination {
                query.append_pair("url", destination);
            }
        }
        url.into()
    }

    fn payload(campaign_id: CampaignId, subscriber_id: SubscriberId) -> String {
        format!("{}:{}", campaign_id, subscriber_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn codec() -> TrackingCodec {
        TrackingCodec::new(&TrackingConfig {
            base_url: "https://annuaire.example/lettre".to_string(),
            secret: "test-secret".to_string(),
            fallback_url: Some("https://annuaire.example/".to_string()),
        })
        .unwrap()
    }

    fn query(url: &str) -> std::collections::HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn test_pixel_url_decodes() {
        let codec = codec();
        let (c, s) = (Uuid::new_v4(), Uuid::new_v4());

        let url = codec.pixel_url(c, s);
        assert!(url.starts_with("https://annuaire.example/lettre/track/open?"));

        let q = query(&url);
        let token = codec.decode(&q["c"], &q["s"], &q["sig"]).unwrap();
        assert_eq!(
            token,
            TrackingToken {
                campaign_id: c,
                subscriber_id: s
            }
        );
    }

    #[test]
    fn test_click_url_carries_destination() {
        let codec = codec();
        let destination = "https://boulangerie.example/promo?jour=samedi&h=10";
        let url = codec.click_url(Uuid::new_v4(), Uuid::new_v4(), destination);

        let q = query(&url);
        assert_eq!(q["url"], destination);
    }

    #[test]
    fn test_forged_ids_are_rejected() {
        let codec = codec();
        let (c, s) = (Uuid::new_v4(), Uuid::new_v4());
        let sig = codec.sign(c, s);

        let other = Uuid::new_v4();
        assert!(codec
            .decode(&c.to_string(), &other.to_string(), &sig)
            .is_err());
        assert!(codec.decode(&c.to_string(), &s.to_string(), "zz").is_err());
        assert!(codec.decode("not-a-uuid", &s.to_string(), &sig).is_err());

        let other_key = TrackingCodec::new(&TrackingConfig {
            secret: "another-secret".to_string(),
            ..TrackingConfig::default()
        })
        .unwrap();
        assert!(other_key
            .decode(&c.to_string(), &s.to_string(), &sig)
            .is_err());
    }

    #[test]
    fn test_redirect_target() {
        let codec = codec();
        assert_eq!(
            codec.redirect_target(Some("https://mairie.example/agenda")),
            "https://mairie.example/agenda"
        );
        assert_eq!(codec.redirect_target(None), "https://annuaire.example/");
        assert_eq!(
            codec.redirect_target(Some("javascript:alert(1)")),
            "https://annuaire.example/"
        );
        assert_eq!(
            codec.redirect_target(Some("/relative/path")),
            "https://annuaire.example/"
        );
    }

    #[test]
    fn test_redirect_keeps_destination_as_written() {
        let codec = codec();
        assert_eq!(
            codec.redirect_target(Some("https://Shop.Example")),
            "https://Shop.Example"
        );
        assert_eq!(
            codec.redirect_target(Some("  https://shop.example/a%20b?x=1  ")),
            "https://shop.example/a%20b?x=1"
        );
    }
}
