//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Verification is split in two: `verify_signature` is a pure check against
//! a known public key, `verify_request` resolves the key through the actor
//! resolver and handles remote key rotation.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::{RsaPublicKey, pkcs1v15::Signature as Pkcs1v15Signature};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::keys::KeyPair;
use super::resolver::ActorResolver;
use crate::canonical::{canonicalize, canonicalize_value};
use crate::error::{AppError, Result};
use crate::metrics::SIGNATURE_FAILURES_TOTAL;
use crate::vocab::VocabularyObject;

/// IMF-fixdate, as required for the Date header
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (IMF-fixdate)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Authority as sent in the Host header: host plus any non-default port.
fn host_header_value(url: &url::Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn path_and_query(url: &url::Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

/// Sign an HTTP request
///
/// Creates HTTP Signature header for outgoing requests.
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `key_pair` - Signing actor's key pair
///
/// # Returns
/// Headers to add: Signature, Date, Digest (if body present)
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    key_pair: &KeyPair,
) -> Result<SignatureHeaders> {
    let digest = body.map(generate_digest);
    sign_request_with_digest(method, url, digest.as_deref(), key_pair, Utc::now())
}

/// Sign a request whose body digest was computed ahead of time.
pub fn sign_request_with_digest(
    method: &str,
    url: &str,
    digest: Option<&str>,
    key_pair: &KeyPair,
    now: DateTime<Utc>,
) -> Result<SignatureHeaders> {
    use rsa::signature::{RandomizedSigner, SignatureEncoding};

    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
    let host = host_header_value(&parsed_url)?;
    let date = now.format(HTTP_DATE_FORMAT).to_string();

    let request_target = format!("{} {}", method.to_lowercase(), path_and_query(&parsed_url));

    let mut signing_parts = vec![
        format!("(request-target): {}", request_target),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    let signing_key = key_pair.signing_key()?;
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let signature_b64 = BASE64.encode(signature.to_bytes());

    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_pair.key_id,
        headers_list.join(" "),
        signature_b64
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest: digest.map(str::to_string),
    })
}

/// Parsed Signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm label; `hs2019` when absent
    pub algorithm: String,
    /// Signed header names, lowercased
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
    pub created: Option<i64>,
    pub expires: Option<i64>,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
///
/// Values are quoted strings, except `created` and `expires` which may be
/// bare integers. Commas inside quotes are part of the value.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;
    let mut created = None;
    let mut expires = None;

    for (name, value) in split_parameters(header)? {
        let slot = match name.as_str() {
            "keyId" => &mut key_id,
            "algorithm" => &mut algorithm,
            "headers" => &mut headers,
            "signature" => &mut signature,
            "created" => &mut created,
            "expires" => &mut expires,
            _ => continue,
        };
        if slot.is_some() {
            return Err(AppError::SignatureMalformed(format!(
                "duplicate parameter `{}`",
                name
            )));
        }
        *slot = Some(value);
    }

    let parse_timestamp = |name: &str, value: Option<String>| -> Result<Option<i64>> {
        value
            .map(|v| {
                v.parse::<i64>().map_err(|_| {
                    AppError::SignatureMalformed(format!("`{}` is not a timestamp", name))
                })
            })
            .transpose()
    };

    let headers: String =
        headers.ok_or_else(|| AppError::SignatureMalformed("missing `headers`".to_string()))?;

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| AppError::SignatureMalformed("missing `keyId`".to_string()))?,
        algorithm: algorithm.unwrap_or_else(|| "hs2019".to_string()),
        headers: headers
            .split_whitespace()
            .map(|s| s.to_ascii_lowercase())
            .collect(),
        signature: signature
            .ok_or_else(|| AppError::SignatureMalformed("missing `signature`".to_string()))?,
        created: parse_timestamp("created", created)?,
        expires: parse_timestamp("expires", expires)?,
    })
}

fn split_parameters(header: &str) -> Result<Vec<(String, String)>> {
    let mut params = Vec::new();
    let mut rest = header.trim();

    while !rest.is_empty() {
        let (name, after_name) = rest
            .split_once('=')
            .ok_or_else(|| AppError::SignatureMalformed("expected `name=value`".to_string()))?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::SignatureMalformed("empty parameter name".to_string()));
        }
        let after_name = after_name.trim_start();

        let (value, remainder) = if let Some(quoted) = after_name.strip_prefix('"') {
            let end = quoted.find('"').ok_or_else(|| {
                AppError::SignatureMalformed(format!("unterminated quote in `{}`", name))
            })?;
            (quoted[..end].to_string(), &quoted[end + 1..])
        } else {
            let end = after_name.find(',').unwrap_or(after_name.len());
            (after_name[..end].trim().to_string(), &after_name[end..])
        };

        let remainder = remainder.trim_start();
        rest = match remainder.strip_prefix(',') {
            Some(next) => next.trim_start(),
            None if remainder.is_empty() => remainder,
            None => {
                return Err(AppError::SignatureMalformed(format!(
                    "unexpected text after `{}`",
                    name
                )));
            }
        };

        params.push((name, value));
    }

    Ok(params)
}

/// An inbound request as seen by the verifier
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    /// Path and query exactly as received
    pub path_and_query: &'a str,
    pub headers: &'a http::HeaderMap,
    pub body: Option<&'a [u8]>,
}

impl<'a> SignedRequest<'a> {
    fn has_body(&self) -> bool {
        self.body.is_some_and(|body| !body.is_empty())
    }

    fn header(&self, name: &str) -> Result<Option<String>> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .map(|value| {
                value.to_str().map_err(|_| {
                    AppError::SignatureMalformed(format!("header `{}` is not visible ASCII", name))
                })
            })
            .collect::<Result<_>>()?;
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.join(", ")))
    }

    /// Parsed Signature header.
    ///
    /// # Errors
    /// `SignatureMissing` when the header is absent.
    pub fn signature(&self) -> Result<ParsedSignature> {
        let header = self.header("signature")?.ok_or(AppError::SignatureMissing)?;
        parse_signature_header(&header)
    }
}

/// Verify an HTTP request signature against a known public key
///
/// Checks run in a fixed order: header grammar, algorithm, signed header
/// coverage, clock skew, body digest, then the RSA signature itself.
///
/// # Errors
/// - `SignatureMissing` / `SignatureMalformed` for absent or unusable headers
/// - `SignatureExpired` if the Date is outside `max_skew_secs`
/// - `DigestMismatch` if the body does not match its digest
/// - `SignatureInvalid` if the signature does not verify
pub fn verify_signature(
    request: &SignedRequest<'_>,
    public_key_pem: &str,
    max_skew_secs: u64,
    now: DateTime<Utc>,
) -> Result<ParsedSignature> {
    let parsed = request.signature()?;
    let signing_string = check_request(request, &parsed, max_skew_secs, now)?;
    verify_with_key(&signing_string, &parsed.signature, public_key_pem)?;
    Ok(parsed)
}

/// Every check that does not need the public key. Returns the signing
/// string to verify.
fn check_request(
    request: &SignedRequest<'_>,
    parsed: &ParsedSignature,
    max_skew_secs: u64,
    now: DateTime<Utc>,
) -> Result<String> {
    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(AppError::SignatureMalformed(format!(
            "unsupported algorithm `{}`",
            parsed.algorithm
        )));
    }

    let signs = |name: &str| parsed.headers.iter().any(|h| h == name);
    for required in ["(request-target)", "host", "date"] {
        if !signs(required) {
            return Err(AppError::SignatureMalformed(format!(
                "signed headers must include `{}`",
                required
            )));
        }
    }
    if request.has_body() && !signs("digest") && !signs("content-digest") {
        return Err(AppError::SignatureMalformed(
            "signed headers must include `digest`".to_string(),
        ));
    }

    check_clock_skew(request, parsed, max_skew_secs, now)?;

    if request.has_body() {
        check_digest(request, signs("digest"))?;
    }

    let mut signing_parts = Vec::with_capacity(parsed.headers.len());
    for name in &parsed.headers {
        let value = match name.as_str() {
            "(request-target)" => format!(
                "{} {}",
                request.method.to_lowercase(),
                request.path_and_query
            ),
            "(created)" => parsed
                .created
                .ok_or_else(|| AppError::SignatureMalformed("missing `created`".to_string()))?
                .to_string(),
            "(expires)" => parsed
                .expires
                .ok_or_else(|| AppError::SignatureMalformed("missing `expires`".to_string()))?
                .to_string(),
            _ => request.header(name)?.ok_or_else(|| {
                AppError::SignatureMalformed(format!("signed header `{}` is missing", name))
            })?,
        };
        signing_parts.push(format!("{}: {}", name, value));
    }

    Ok(signing_parts.join("\n"))
}

fn check_clock_skew(
    request: &SignedRequest<'_>,
    parsed: &ParsedSignature,
    max_skew_secs: u64,
    now: DateTime<Utc>,
) -> Result<()> {
    let date_str = request
        .header("date")?
        .ok_or_else(|| AppError::SignatureMalformed("missing Date header".to_string()))?;
    let date = DateTime::parse_from_rfc2822(&date_str)
        .map_err(|_| AppError::SignatureMalformed("invalid Date format".to_string()))?;

    let skew_secs = now.timestamp() - date.timestamp();
    if skew_secs.unsigned_abs() > max_skew_secs {
        return Err(AppError::SignatureExpired {
            skew_secs,
            max_secs: max_skew_secs,
        });
    }

    if let Some(expires) = parsed.expires {
        if now.timestamp() > expires {
            return Err(AppError::SignatureExpired {
                skew_secs: now.timestamp() - expires,
                max_secs: 0,
            });
        }
    }

    Ok(())
}

/// Match the body against Digest (or Content-Digest).
///
/// A digest is accepted if it equals SHA-256 of the raw body or of the
/// body's canonical form, so re-serializing peers still verify.
fn check_digest(request: &SignedRequest<'_>, prefer_digest: bool) -> Result<()> {
    let body = request.body.unwrap_or_default();

    let claimed = if prefer_digest {
        let value = request
            .header("digest")?
            .ok_or_else(|| AppError::SignatureMalformed("missing Digest header".to_string()))?;
        sha256_from_digest(&value)?
    } else {
        let value = request.header("content-digest")?.ok_or_else(|| {
            AppError::SignatureMalformed("missing Content-Digest header".to_string())
        })?;
        sha256_from_content_digest(&value)?
    };

    let raw = Sha256::digest(body);
    if bool::from(claimed.as_slice().ct_eq(raw.as_slice())) {
        return Ok(());
    }

    if let Some(canonical) = canonical_digest(body) {
        if bool::from(claimed.as_slice().ct_eq(canonical.as_slice())) {
            return Ok(());
        }
    }

    Err(AppError::DigestMismatch)
}

fn canonical_digest(body: &[u8]) -> Option<[u8; 32]> {
    if let Ok(document) = VocabularyObject::from_slice(body) {
        return canonicalize(&document).ok().map(|c| c.digest);
    }
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    canonicalize_value(&value).ok().map(|c| c.digest)
}

/// `SHA-256=<b64>[,<other algorithms>]`
fn sha256_from_digest(value: &str) -> Result<Vec<u8>> {
    value
        .split(',')
        .map(str::trim)
        .find_map(|entry| {
            let (algorithm, encoded) = entry.split_once('=')?;
            algorithm
                .eq_ignore_ascii_case("sha-256")
                .then(|| encoded.to_string())
        })
        .ok_or_else(|| AppError::SignatureMalformed("no SHA-256 digest".to_string()))
        .and_then(|encoded| decode_digest(&encoded))
}

/// `sha-256=:<b64>:[,<other algorithms>]`
fn sha256_from_content_digest(value: &str) -> Result<Vec<u8>> {
    value
        .split(',')
        .map(str::trim)
        .find_map(|entry| {
            let (algorithm, encoded) = entry.split_once('=')?;
            algorithm
                .eq_ignore_ascii_case("sha-256")
                .then(|| encoded.trim_matches(':').to_string())
        })
        .ok_or_else(|| AppError::SignatureMalformed("no sha-256 content digest".to_string()))
        .and_then(|encoded| decode_digest(&encoded))
}

fn decode_digest(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|_| AppError::SignatureMalformed("digest is not base64".to_string()))
}

fn verify_with_key(signing_string: &str, signature_b64: &str, public_key_pem: &str) -> Result<()> {
    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| AppError::SignatureMalformed("signature is not base64".to_string()))?;

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| AppError::ActorInvalid(format!("unusable public key: {}", e)))?;

    let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public_key);

    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| AppError::SignatureInvalid(format!("invalid signature format: {}", e)))?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| AppError::SignatureInvalid("verification failed".to_string()))
}

/// Outcome of a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    pub key_id: String,
    /// Actor owning the key
    pub owner: String,
}

/// Verify an inbound request, resolving the signer's key remotely.
///
/// A key id the cached actor does not advertise triggers one refetch of
/// the actor; a signature that fails against a cached key is retried once
/// against a refreshed copy. Both cover key rotation on the remote side.
pub async fn verify_request(
    resolver: &ActorResolver,
    request: &SignedRequest<'_>,
    max_skew_secs: u64,
    now: DateTime<Utc>,
) -> Result<VerifiedSignature> {
    let result = verify_request_inner(resolver, request, max_skew_secs, now).await;
    if let Err(e) = &result {
        SIGNATURE_FAILURES_TOTAL
            .with_label_values(&[e.kind()])
            .inc();
        tracing::debug!(error = %e, "Rejected inbound signature");
    }
    result
}

async fn verify_request_inner(
    resolver: &ActorResolver,
    request: &SignedRequest<'_>,
    max_skew_secs: u64,
    now: DateTime<Utc>,
) -> Result<VerifiedSignature> {
    let parsed = request.signature()?;
    let signing_string = check_request(request, &parsed, max_skew_secs, now)?;

    let (actor, key) = resolver.resolve_key(&parsed.key_id).await?;

    match verify_with_key(&signing_string, &parsed.signature, &key.public_key_pem) {
        Ok(()) => {}
        Err(AppError::SignatureInvalid(_)) => {
            let refreshed = resolver.refresh(&actor.id).await?;
            let fresh_key = refreshed.public_key(&parsed.key_id).ok_or_else(|| {
                AppError::SignatureInvalid(format!("key `{}` is no longer advertised", parsed.key_id))
            })?;
            if fresh_key.public_key_pem == key.public_key_pem {
                return Err(AppError::SignatureInvalid("verification failed".to_string()));
            }
            verify_with_key(&signing_string, &parsed.signature, &fresh_key.public_key_pem)?;
        }
        Err(e) => return Err(e),
    }

    Ok(VerifiedSignature {
        key_id: parsed.key_id,
        owner: key.owner,
    })
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};

    const KEY_OWNER: &str = "https://remote.example/users/alice";

    fn key_pair() -> KeyPair {
        KeyPair::generate(KEY_OWNER, 1024).expect("key generation should work")
    }

    fn build_signed_header_map(
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        key_pair: &KeyPair,
    ) -> (HeaderMap, String) {
        let signed = sign_request(method, url, body, key_pair).expect("signed");
        let parsed_url = url::Url::parse(url).expect("valid test url");

        let mut headers = HeaderMap::new();
        headers.insert(
            "host",
            HeaderValue::from_str(&host_header_value(&parsed_url).expect("host"))
                .expect("host header"),
        );
        headers.insert(
            "date",
            HeaderValue::from_str(&signed.date).expect("date header"),
        );
        if let Some(digest) = signed.digest {
            headers.insert(
                "digest",
                HeaderValue::from_str(&digest).expect("digest header"),
            );
        }
        headers.insert(
            "signature",
            HeaderValue::from_str(&signed.signature).expect("signature header"),
        );

        (headers, path_and_query(&parsed_url))
    }

    fn request<'a>(path: &'a str, headers: &'a HeaderMap, body: &'a [u8]) -> SignedRequest<'a> {
        SignedRequest {
            method: "POST",
            path_and_query: path,
            headers,
            body: Some(body),
        }
    }

    #[test]
    fn verify_signature_accepts_valid_signed_request() {
        let key_pair = key_pair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://remote.example/inbox?foo=bar",
            Some(body),
            &key_pair,
        );

        let result = verify_signature(
            &request(&path, &headers, body),
            &key_pair.public_key_pem,
            300,
            Utc::now(),
        );
        let parsed = result.expect("valid signature should verify");
        assert_eq!(parsed.key_id, format!("{}#main-key", KEY_OWNER));
    }

    #[test]
    fn host_includes_non_default_port() {
        let key_pair = key_pair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) =
            build_signed_header_map("POST", "http://127.0.0.1:8080/inbox", Some(body), &key_pair);
        assert_eq!(headers.get("host").expect("host"), "127.0.0.1:8080");
        assert!(
            verify_signature(
                &request(&path, &headers, body),
                &key_pair.public_key_pem,
                300,
                Utc::now()
            )
            .is_ok()
        );
    }

    #[test]
    fn verify_signature_rejects_missing_signature_header() {
        let key_pair = key_pair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", Some(body), &key_pair);
        headers.remove("signature");

        assert!(matches!(
            verify_signature(
                &request(&path, &headers, body),
                &key_pair.public_key_pem,
                300,
                Utc::now()
            ),
            Err(AppError::SignatureMissing)
        ));
    }

    #[test]
    fn verify_signature_rejects_missing_digest_header_for_body() {
        let key_pair = key_pair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", Some(body), &key_pair);
        headers.remove("digest");

        match verify_signature(
            &request(&path, &headers, body),
            &key_pair.public_key_pem,
            300,
            Utc::now(),
        ) {
            Err(AppError::SignatureMalformed(msg)) => assert!(msg.contains("Digest")),
            other => panic!("expected missing Digest header error, got: {other:?}"),
        }
    }

    #[test]
    fn verify_signature_rejects_when_date_not_in_signed_headers() {
        let key_pair = key_pair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", Some(body), &key_pair);

        let signature_header = headers
            .get("signature")
            .expect("signature")
            .to_str()
            .expect("signature str");
        let parsed = parse_signature_header(signature_header).expect("parsed signature");
        let tampered = format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"(request-target) host digest\",signature=\"{}\"",
            parsed.key_id, parsed.algorithm, parsed.signature
        );
        headers.insert(
            "signature",
            HeaderValue::from_str(&tampered).expect("tampered signature"),
        );

        match verify_signature(
            &request(&path, &headers, body),
            &key_pair.public_key_pem,
            300,
            Utc::now(),
        ) {
            Err(AppError::SignatureMalformed(msg)) => assert!(msg.contains("`date`")),
            other => panic!("expected missing signed date error, got: {other:?}"),
        }
    }

    #[test]
    fn verify_signature_rejects_stale_date() {
        let key_pair = key_pair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", Some(body), &key_pair);

        let later = Utc::now() + chrono::Duration::seconds(301);
        assert!(matches!(
            verify_signature(&request(&path, &headers, body), &key_pair.public_key_pem, 300, later),
            Err(AppError::SignatureExpired { max_secs: 300, .. })
        ));
    }

    #[test]
    fn verify_signature_rejects_tampered_body() {
        let key_pair = key_pair();
        let body = br#"{"type":"Follow","object":"https://b.example/users/bob"}"#;
        let (headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", Some(body), &key_pair);

        let tampered = br#"{"type":"Follow","object":"https://b.example/users/eve"}"#;
        assert!(matches!(
            verify_signature(
                &request(&path, &headers, tampered),
                &key_pair.public_key_pem,
                300,
                Utc::now()
            ),
            Err(AppError::DigestMismatch)
        ));
    }

    #[test]
    fn digest_of_canonical_form_is_accepted_for_reformatted_body() {
        let key_pair = key_pair();
        let document = VocabularyObject::from_slice(
            br#"{"type":"Like","id":"https://remote.example/a/1","actor":"https://remote.example/users/alice","object":"https://b.example/n/1"}"#,
        )
        .expect("document");
        let canonical = canonicalize(&document).expect("canonical");

        let signed = sign_request_with_digest(
            "POST",
            "https://b.example/inbox",
            Some(&canonical.digest_header()),
            &key_pair,
            Utc::now(),
        )
        .expect("signed");

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("b.example"));
        headers.insert("date", HeaderValue::from_str(&signed.date).expect("date"));
        headers.insert(
            "digest",
            HeaderValue::from_str(signed.digest.as_deref().expect("digest")).expect("digest"),
        );
        headers.insert(
            "signature",
            HeaderValue::from_str(&signed.signature).expect("signature"),
        );

        // Same document, different property order and whitespace.
        let reformatted = br#"{ "object": "https://b.example/n/1", "actor": "https://remote.example/users/alice",
            "id": "https://remote.example/a/1", "type": "Like" }"#;
        assert!(
            verify_signature(
                &request("/inbox", &headers, reformatted),
                &key_pair.public_key_pem,
                300,
                Utc::now()
            )
            .is_ok()
        );
    }

    #[test]
    fn content_digest_is_accepted() {
        let key_pair = key_pair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", None, &key_pair);
        let content_digest = format!("sha-256=:{}:", BASE64.encode(Sha256::digest(body)));
        headers.insert(
            "content-digest",
            HeaderValue::from_str(&content_digest).expect("content digest"),
        );

        // Re-sign with content-digest covered.
        let parsed_url = url::Url::parse("https://remote.example/inbox").expect("url");
        let date = headers.get("date").expect("date").to_str().expect("str").to_string();
        let signing_string = format!(
            "(request-target): post {}\nhost: remote.example\ndate: {}\ncontent-digest: {}",
            parsed_url.path(),
            date,
            content_digest
        );
        use rsa::signature::{RandomizedSigner, SignatureEncoding};
        let signature = key_pair
            .signing_key()
            .expect("signing key")
            .sign_with_rng(&mut rand::thread_rng(), signing_string.as_bytes());
        headers.insert(
            "signature",
            HeaderValue::from_str(&format!(
                "keyId=\"{}\",headers=\"(request-target) host date content-digest\",signature=\"{}\"",
                key_pair.key_id,
                BASE64.encode(signature.to_bytes())
            ))
            .expect("signature"),
        );

        assert!(
            verify_signature(
                &request(&path, &headers, body),
                &key_pair.public_key_pem,
                300,
                Utc::now()
            )
            .is_ok()
        );
    }

    #[test]
    fn verify_signature_rejects_wrong_key() {
        let signer = key_pair();
        let other = KeyPair::generate(KEY_OWNER, 1024).expect("other key");
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", Some(body), &signer);

        assert!(matches!(
            verify_signature(
                &request(&path, &headers, body),
                &other.public_key_pem,
                300,
                Utc::now()
            ),
            Err(AppError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn parse_signature_header_handles_quoting_and_defaults() {
        let parsed = parse_signature_header(
            r#"keyId="https://remote.example/users/alice#main-key", headers="(request-target) host date", signature="YWJj,ZGVm", created=1700000000, extra="ignored""#,
        )
        .expect("parsed");
        assert_eq!(parsed.algorithm, "hs2019");
        assert_eq!(parsed.signature, "YWJj,ZGVm");
        assert_eq!(parsed.created, Some(1_700_000_000));
        assert_eq!(parsed.headers, vec!["(request-target)", "host", "date"]);
    }

    #[test]
    fn parse_signature_header_rejects_duplicates_and_bad_quoting() {
        assert!(matches!(
            parse_signature_header(r#"keyId="a",keyId="b",headers="date",signature="x""#),
            Err(AppError::SignatureMalformed(_))
        ));
        assert!(matches!(
            parse_signature_header(r#"keyId="a,headers="date",signature="x"#),
            Err(AppError::SignatureMalformed(_))
        ));
        assert!(matches!(
            parse_signature_header(r#"keyId="a",signature="x""#),
            Err(AppError::SignatureMalformed(_))
        ));
    }

    #[test]
    fn key_id_matches_actor_accepts_same_actor() {
        assert!(key_id_matches_actor(
            "https://remote.example/users/alice#main-key",
            "https://remote.example/users/alice",
        ));
    }

    #[test]
    fn key_id_matches_actor_rejects_different_actor() {
        assert!(!key_id_matches_actor(
            "https://remote.example/users/bob#main-key",
            "https://remote.example/users/alice",
        ));
    }

    fn resolver_for(fetcher: std::sync::Arc<crate::federation::test_support::FakeFetcher>) -> ActorResolver {
        ActorResolver::new(
            std::sync::Arc::new(crate::storage::MemoryStore::new()),
            fetcher,
            std::time::Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn rotated_key_under_the_same_key_id_is_refetched_once() {
        use crate::federation::test_support::{FakeFetcher, actor_document};
        use std::sync::Arc;

        let old_key = key_pair();
        let new_key = key_pair();
        assert_eq!(old_key.key_id, new_key.key_id);

        let fetcher = Arc::new(
            FakeFetcher::new().with_document(KEY_OWNER, actor_document(KEY_OWNER, &old_key.public_key_pem)),
        );
        let resolver = resolver_for(fetcher.clone());
        resolver.resolve(KEY_OWNER).await.expect("warm cache");
        assert_eq!(fetcher.calls(KEY_OWNER), 1);

        fetcher.set_document(KEY_OWNER, actor_document(KEY_OWNER, &new_key.public_key_pem));

        let body = br#"{"type":"Follow"}"#;
        let (headers, path) =
            build_signed_header_map("POST", "https://local.example/inbox", Some(body), &new_key);
        let verified = verify_request(&resolver, &request(&path, &headers, body), 300, Utc::now())
            .await
            .expect("rotated key should verify after one refresh");

        assert_eq!(verified.key_id, new_key.key_id);
        assert_eq!(verified.owner, KEY_OWNER);
        assert_eq!(fetcher.calls(KEY_OWNER), 2);

        // The refreshed key is cached; a second request needs no fetch.
        let (headers, path) =
            build_signed_header_map("POST", "https://local.example/inbox", Some(body), &new_key);
        verify_request(&resolver, &request(&path, &headers, body), 300, Utc::now())
            .await
            .expect("cached rotated key");
        assert_eq!(fetcher.calls(KEY_OWNER), 2);
    }

    #[tokio::test]
    async fn wrong_signature_refreshes_once_then_fails() {
        use crate::federation::test_support::{FakeFetcher, actor_document};
        use std::sync::Arc;

        let advertised = key_pair();
        let forger = key_pair();

        let fetcher = Arc::new(
            FakeFetcher::new()
                .with_document(KEY_OWNER, actor_document(KEY_OWNER, &advertised.public_key_pem)),
        );
        let resolver = resolver_for(fetcher.clone());

        let body = br#"{"type":"Follow"}"#;
        let (headers, path) =
            build_signed_header_map("POST", "https://local.example/inbox", Some(body), &forger);
        let result =
            verify_request(&resolver, &request(&path, &headers, body), 300, Utc::now()).await;

        assert!(matches!(result, Err(AppError::SignatureInvalid(_))));
        // Initial resolve plus exactly one refresh.
        assert_eq!(fetcher.calls(KEY_OWNER), 2);

        let result =
            verify_request(&resolver, &request(&path, &headers, body), 300, Utc::now()).await;
        assert!(matches!(result, Err(AppError::SignatureInvalid(_))));
        assert_eq!(fetcher.calls(KEY_OWNER), 3);
    }
}
