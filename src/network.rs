//! Live network signal behind the VPN check.
//!
//! The exit IP's geolocation is fetched from an IP lookup endpoint and
//! reduced to a [`NetworkSignal`]. VPN use is inferred from the organization
//! name alone.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ChameleonError, Result};

/// Organization-name fragments that indicate a VPN, proxy or datacenter exit.
pub const VPN_ORG_TERMS: [&str; 5] = ["vpn", "proxy", "hosting", "cloud", "datacenter"];

/// Raw IP lookup body (`ipapi.co/json` shape).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpLookup {
    pub ip: Option<String>,
    pub country_name: Option<String>,
    /// ISO country code
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub timezone: Option<String>,
    pub org: Option<String>,
    pub asn: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Set on rate limiting and other refusals
    #[serde(default)]
    pub error: bool,
    pub reason: Option<String>,
}

/// Parsed network signal, also the `checkVPN` response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSignal {
    pub ip: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub timezone: Option<String>,
    pub org: Option<String>,
    #[serde(rename = "isVPN")]
    pub is_vpn: bool,
    pub asn: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl NetworkSignal {
    pub fn from_lookup(lookup: IpLookup) -> Result<Self> {
        if lookup.error {
            return Err(ChameleonError::NetworkFailure(
                lookup.reason.unwrap_or_else(|| "lookup refused".into()),
            ));
        }
        Ok(Self {
            is_vpn: lookup.org.as_deref().map(detect_vpn).unwrap_or(false),
            ip: lookup.ip,
            country: lookup.country_name,
            country_code: lookup.country,
            city: lookup.city,
            region: lookup.region,
            timezone: lookup.timezone,
            org: lookup.org,
            asn: lookup.asn,
            latitude: lookup.latitude,
            longitude: lookup.longitude,
        })
    }

    pub fn from_json(body: &str) -> Result<Self> {
        let lookup: IpLookup = serde_json::from_str(body)
            .map_err(|e| ChameleonError::NetworkFailure(format!("bad lookup body: {}", e)))?;
        Self::from_lookup(lookup)
    }
}

/// Case-insensitive match of `org` against [`VPN_ORG_TERMS`].
pub fn detect_vpn(org: &str) -> bool {
    let org = org.to_lowercase();
    VPN_ORG_TERMS.iter().any(|term| org.contains(term))
}

/// Source of the live network signal.
#[async_trait(?Send)]
pub trait NetworkProbe {
    async fn probe(&self) -> Result<NetworkSignal>;
}

/// `fetch`-based probe against an ipapi-compatible endpoint. Works from both
/// window and worker scopes.
#[derive(Debug, Clone)]
pub struct IpApiProbe {
    url: String,
}

impl IpApiProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    #[cfg(target_arch = "wasm32")]
    async fn fetch_body(&self) -> Result<String> {
        use wasm_bindgen::JsCast;
        use wasm_bindgen_futures::JsFuture;
        use web_sys::{Request, RequestCache, RequestInit, RequestMode, Response};

        let fail = |what: &str, e: wasm_bindgen::JsValue| {
            ChameleonError::NetworkFailure(format!("{}: {:?}", what, e))
        };

        let opts = RequestInit::new();
        opts.set_method("GET");
        opts.set_mode(RequestMode::Cors);
        opts.set_cache(RequestCache::NoStore);
        let request = Request::new_with_str_and_init(&self.url, &opts).map_err(|e| fail("Request::new failed", e))?;
        request
            .headers()
            .set("Accept", "application/json")
            .map_err(|e| fail("set header failed", e))?;

        let global = js_sys::global();
        let pending = if let Some(window) = global.dyn_ref::<web_sys::Window>() {
            window.fetch_with_request(&request)
        } else if let Some(worker) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
            worker.fetch_with_request(&request)
        } else {
            return Err(ChameleonError::NetworkFailure("no fetch in this scope".into()));
        };

        let resp: Response = JsFuture::from(pending)
            .await
            .map_err(|e| fail("fetch failed", e))?
            .dyn_into()
            .map_err(|_| ChameleonError::NetworkFailure("response is not a Response".into()))?;
        if !resp.ok() {
            return Err(ChameleonError::NetworkFailure(format!("HTTP {}", resp.status())));
        }

        let text = JsFuture::from(resp.text().map_err(|e| fail("text failed", e))?)
            .await
            .map_err(|e| fail("await text failed", e))?;
        text.as_string()
            .ok_or_else(|| ChameleonError::NetworkFailure("body is not text".into()))
    }

    #[cfg(not(target_arch = "wasm32"))]
    async fn fetch_body(&self) -> Result<String> {
        Err(ChameleonError::NetworkFailure(format!(
            "fetch unavailable outside the browser ({})",
            self.url
        )))
    }
}

#[async_trait(?Send)]
impl NetworkProbe for IpApiProbe {
    async fn probe(&self) -> Result<NetworkSignal> {
        let body = self.fetch_body().await?;
        let signal = NetworkSignal::from_json(&body)?;
        log::info!(
            "🌐 Exit {} / {} (vpn: {})",
            signal.country_code.as_deref().unwrap_or("??"),
            signal.org.as_deref().unwrap_or("unknown org"),
            signal.is_vpn
        );
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_vpn_terms() {
        assert!(detect_vpn("DigitalOcean Cloud Hosting"));
        assert!(detect_vpn("NordVPN"));
        assert!(detect_vpn("Some DATACENTER Ltd"));
        assert!(!detect_vpn("Comcast Cable Communications"));
        assert!(!detect_vpn(""));
    }

    #[test]
    fn test_parse_lookup() {
        let body = r#"{
            "ip": "203.0.113.7", "country_name": "Germany", "country": "DE",
            "city": "Frankfurt am Main", "region": "Hesse", "timezone": "Europe/Berlin",
            "org": "DigitalOcean Cloud Hosting", "asn": "AS14061",
            "latitude": 50.1109, "longitude": 8.6821
        }"#;
        let signal = NetworkSignal::from_json(body).unwrap();
        assert!(signal.is_vpn);
        assert_eq!(signal.country.as_deref(), Some("Germany"));
        assert_eq!(signal.country_code.as_deref(), Some("DE"));
        assert_eq!(signal.timezone.as_deref(), Some("Europe/Berlin"));
    }

    #[test]
    fn test_wire_shape() {
        let signal = NetworkSignal {
            org: Some("Comcast".into()),
            country_code: Some("US".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["isVPN"], false);
        assert_eq!(json["countryCode"], "US");
    }

    #[test]
    fn test_missing_org_is_not_vpn() {
        let signal = NetworkSignal::from_json(r#"{"ip":"198.51.100.1"}"#).unwrap();
        assert!(!signal.is_vpn);
    }

    #[test]
    fn test_rate_limited_is_failure() {
        let err = NetworkSignal::from_json(r#"{"error":true,"reason":"RateLimited"}"#).unwrap_err();
        assert_eq!(err, ChameleonError::NetworkFailure("RateLimited".into()));
    }

    #[test]
    fn test_native_lookup_fails_cleanly() {
        let probe = IpApiProbe::new("https://ipapi.co/json/");
        let err = futures::executor::block_on(probe.probe()).unwrap_err();
        assert!(matches!(err, ChameleonError::NetworkFailure(_)));
        assert_eq!(err.user_message(), "Failed to check VPN status");
    }
}
