// # Cloudflare DNS Provider
//
// `DnsProvider` implementation over the Cloudflare v4 REST API.
//
// - Bearer-token authentication per account; the token is read from the
//   account passed to each call and never logged
// - Listing paginates internally and always returns the full set
// - Updates preserve `type`, `name`, `proxied`, and `ttl`; only the
//   record content changes, and the PUT is skipped entirely when the
//   record already holds the requested value
// - Every HTTP failure is classified into the engine's fault taxonomy
//   before it leaves this crate (401/403 auth, 404 not-found, other 4xx
//   rejected, 429/5xx/network transient)
// - No retries, no backoff, no sleeps: the engine owns those policies
//
// ## Dry-Run Mode
//
// With `dry_run` set the provider performs all GET requests but logs and
// skips PUTs, reporting them as successful. Useful for validating a new
// configuration against live zones without touching any records.
//
// ## API Reference
//
// - List zones:       GET /zones
// - List DNS records: GET /zones/:zone_id/dns_records
// - Read DNS record:  GET /zones/:zone_id/dns_records/:record_id
// - Update record:    PUT /zones/:zone_id/dns_records/:record_id
// - Verify token:     GET /user/tokens/verify

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

use rotodns_core::config::{Account, RecordType};
use rotodns_core::traits::dns_provider::{DnsProvider, Record, TokenVerification, Zone};
use rotodns_core::{Error, FaultKind, Result};

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Per-request timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for listing endpoints
const PER_PAGE: u32 = 100;

/// Scope needed to enumerate zones
const ZONE_READ_PERMISSION: &str = "Zone.Zone:Read";

/// Scope rotation work actually needs: `update_record` writes DNS
/// records, and a token can list zones cleanly while still lacking it
const DNS_EDIT_PERMISSION: &str = "Zone.DNS:Edit";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, context: &str) -> Result<T> {
        if !self.success {
            let messages: Vec<String> = self.errors.iter().map(|e| e.message.clone()).collect();
            return Err(Error::rejected(format!(
                "{}: {}",
                context,
                messages.join(", ")
            )));
        }
        self.result
            .ok_or_else(|| Error::transient(format!("{}: empty result", context)))
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ZonePayload {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecordPayload {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    content: String,
    ttl: u32,
    #[serde(default)]
    proxied: bool,
}

#[derive(Debug, Serialize)]
struct UpdatePayload<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: String,
    ttl: u32,
    proxied: bool,
}

#[derive(Debug, Deserialize)]
struct TokenStatus {
    status: String,
}

/// Cloudflare provider client
///
/// One instance serves every configured account; credentials are read
/// from the account passed to each call.
#[derive(Debug, Clone)]
pub struct CloudflareProvider {
    client: reqwest::Client,
    base_url: String,
    dry_run: bool,
}

impl Default for CloudflareProvider {
    fn default() -> Self {
        Self::new(false)
    }
}

impl CloudflareProvider {
    pub fn new(dry_run: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: CLOUDFLARE_API_BASE.to_string(),
            dry_run,
        }
    }

    /// Point the client at a different API endpoint (tests)
    pub fn with_base_url(base_url: impl Into<String>, dry_run: bool) -> Self {
        let mut provider = Self::new(dry_run);
        provider.base_url = base_url.into();
        provider
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        account: &Account,
        url: &str,
        context: &str,
    ) -> Result<ApiResponse<T>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(account.token.expose())
            .send()
            .await
            .map_err(|e| classify_reqwest(e, context))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, context, &body));
        }

        response
            .json::<ApiResponse<T>>()
            .await
            .map_err(|e| Error::transient(format!("{}: invalid response body: {}", context, e)))
    }

    /// Fetch all pages of a listing endpoint
    async fn get_paged<T: serde::de::DeserializeOwned>(
        &self,
        account: &Account,
        base: &str,
        extra_query: &str,
        context: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let url = format!(
                "{}?page={}&per_page={}{}",
                base, page, PER_PAGE, extra_query
            );
            let response = self.get_json::<Vec<T>>(account, &url, context).await?;
            let info = match &response.result_info {
                Some(info) => Some((info.page, info.total_pages)),
                None => None,
            };
            items.extend(response.into_result(context)?);

            match info {
                Some((current, total)) if current < total => page = current + 1,
                _ => break,
            }
        }
        Ok(items)
    }

    /// Check whether the token can write DNS records in `zone_id`
    ///
    /// Lists the zone's records and re-PUTs the first one with its
    /// current content: a no-op for the record, but it exercises the
    /// edit scope that `update_record` needs. Returns the missing
    /// permission name, or `None` when the scope is present or the
    /// zone holds nothing to probe against.
    async fn probe_dns_edit(
        &self,
        account: &Account,
        zone_id: &str,
    ) -> Result<Option<&'static str>> {
        let records = match self.list_records(account, zone_id, None).await {
            Ok(records) => records,
            Err(e) if e.kind() == FaultKind::Auth => return Ok(Some(DNS_EDIT_PERMISSION)),
            Err(e) => return Err(e),
        };
        let Some(record) = records.first() else {
            return Ok(None);
        };
        if self.dry_run {
            return Ok(None);
        }

        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.base_url, zone_id, record.id
        );
        let context = format!("probe record {} for write access", record.id);
        let payload = UpdatePayload {
            record_type: record.record_type.as_str(),
            name: &record.name,
            content: record.value.to_string(),
            ttl: record.ttl,
            proxied: record.proxied,
        };

        let response = self
            .client
            .put(&url)
            .bearer_auth(account.token.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify_reqwest(e, &context))?;

        let status = response.status();
        if matches!(status.as_u16(), 401 | 403) {
            return Ok(Some(DNS_EDIT_PERMISSION));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &context, &body));
        }
        Ok(None)
    }
}

fn classify_status(status: StatusCode, context: &str, body: &str) -> Error {
    let detail = if body.is_empty() { "" } else { ": " };
    match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "{}: token invalid or lacks permission (HTTP {})",
            context, status
        )),
        404 => Error::not_found(format!("{} (HTTP 404)", context)),
        429 => Error::transient(format!("{}: rate limited (HTTP 429)", context)),
        500..=599 => Error::transient(format!(
            "{}: server error (HTTP {}){}{}",
            context, status, detail, body
        )),
        _ => Error::rejected(format!(
            "{}: HTTP {}{}{}",
            context, status, detail, body
        )),
    }
}

fn classify_reqwest(err: reqwest::Error, context: &str) -> Error {
    // Timeouts, connection resets, and DNS failures are all transient
    // from the engine's point of view.
    Error::transient(format!("{}: {}", context, err))
}

fn parse_record(payload: RecordPayload, context: &str) -> Result<Record> {
    let record_type = match payload.record_type.as_str() {
        "A" => RecordType::A,
        "AAAA" => RecordType::Aaaa,
        other => {
            return Err(Error::rejected(format!(
                "{}: record {} has unsupported type {}",
                context, payload.id, other
            )))
        }
    };
    let value: IpAddr = payload.content.parse().map_err(|e| {
        Error::rejected(format!(
            "{}: record {} has non-address content: {}",
            context, payload.id, e
        ))
    })?;
    Ok(Record {
        id: payload.id,
        name: payload.name,
        record_type,
        value,
        proxied: payload.proxied,
        ttl: payload.ttl,
    })
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn list_zones(&self, account: &Account) -> Result<Vec<Zone>> {
        let base = format!("{}/zones", self.base_url);
        let zones = self
            .get_paged::<ZonePayload>(account, &base, "", "list zones")
            .await?;
        Ok(zones
            .into_iter()
            .map(|z| Zone {
                id: z.id,
                name: z.name,
            })
            .collect())
    }

    async fn list_records(
        &self,
        account: &Account,
        zone_id: &str,
        type_filter: Option<RecordType>,
    ) -> Result<Vec<Record>> {
        let base = format!("{}/zones/{}/dns_records", self.base_url, zone_id);
        let extra = match type_filter {
            Some(t) => format!("&type={}", t.as_str()),
            None => String::new(),
        };
        let context = format!("list records in zone {}", zone_id);
        let payloads = self
            .get_paged::<RecordPayload>(account, &base, &extra, &context)
            .await?;

        // Without a filter the zone may hold record types the engine
        // does not manage; those are dropped rather than rejected.
        payloads
            .into_iter()
            .filter(|p| matches!(p.record_type.as_str(), "A" | "AAAA"))
            .map(|p| parse_record(p, &context))
            .collect()
    }

    async fn get_record(
        &self,
        account: &Account,
        zone_id: &str,
        record_id: &str,
    ) -> Result<Record> {
        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.base_url, zone_id, record_id
        );
        let context = format!("read record {}", record_id);
        let response = self
            .get_json::<RecordPayload>(account, &url, &context)
            .await?;
        parse_record(response.into_result(&context)?, &context)
    }

    async fn update_record(
        &self,
        account: &Account,
        zone_id: &str,
        record_id: &str,
        new_value: IpAddr,
    ) -> Result<Record> {
        let current = self.get_record(account, zone_id, record_id).await?;

        if current.value == new_value {
            debug!(record = %record_id, value = %new_value, "record already current, skipping write");
            return Ok(current);
        }

        if self.dry_run {
            info!(
                record = %record_id,
                from = %current.value,
                to = %new_value,
                "[dry-run] would update record"
            );
            return Ok(Record {
                value: new_value,
                ..current
            });
        }

        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.base_url, zone_id, record_id
        );
        let context = format!("update record {}", record_id);
        let payload = UpdatePayload {
            record_type: current.record_type.as_str(),
            name: &current.name,
            content: new_value.to_string(),
            ttl: current.ttl,
            proxied: current.proxied,
        };

        let response = self
            .client
            .put(&url)
            .bearer_auth(account.token.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify_reqwest(e, &context))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &context, &body));
        }

        let api: ApiResponse<RecordPayload> = response
            .json()
            .await
            .map_err(|e| Error::transient(format!("{}: invalid response body: {}", context, e)))?;
        let updated = parse_record(api.into_result(&context)?, &context)?;

        debug!(
            record = %record_id,
            from = %current.value,
            to = %updated.value,
            "record updated"
        );
        Ok(updated)
    }

    async fn verify_token(&self, account: &Account) -> Result<TokenVerification> {
        let url = format!("{}/user/tokens/verify", self.base_url);
        let context = format!("verify token for account {}", account.id);

        let status = match self.get_json::<TokenStatus>(account, &url, &context).await {
            Ok(response) => response.into_result(&context)?,
            Err(e) if e.kind() == FaultKind::Auth => {
                return Ok(TokenVerification {
                    valid: false,
                    missing_permissions: Vec::new(),
                })
            }
            Err(e) => return Err(e),
        };

        if status.status != "active" {
            return Ok(TokenVerification {
                valid: false,
                missing_permissions: Vec::new(),
            });
        }

        // The verify endpoint only proves the token authenticates.
        // Probe zone listing, then an actual DNS-record write, because
        // a token can hold Zone:Read without the edit scope updates
        // need.
        let mut missing = Vec::new();
        match self.list_zones(account).await {
            Ok(zones) => {
                if let Some(zone) = zones.first() {
                    if let Some(permission) = self.probe_dns_edit(account, &zone.id).await? {
                        missing.push(permission.to_string());
                    }
                }
            }
            Err(e) if e.kind() == FaultKind::Auth => {
                // Without zone access the edit scope cannot be probed
                // either; report the blocker we could observe.
                missing.push(ZONE_READ_PERMISSION.to_string());
            }
            Err(e) => return Err(e),
        }

        Ok(TokenVerification {
            valid: true,
            missing_permissions: missing,
        })
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}
