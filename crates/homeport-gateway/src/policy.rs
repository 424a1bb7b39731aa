//! Per-request sharing decisions
//!
//! [`SharingPolicy::evaluate`] maps a request and the port's record to a
//! [`Decision`]. Evaluation has no side effects; cookie issuance and
//! failed-attempt accounting happen only in
//! [`SharingPolicy::submit_password`], which reserves its rate limit slot
//! before verifying so concurrent guesses from one IP stay bounded.

use axum::http::{HeaderMap, Method, Uri};
use chrono::{DateTime, Utc};
use homeport_auth::{
    verify_password, AuthCookie, CookieSigner, PasswordError, RateLimitStatus, RateLimiter,
    SessionValidator,
};
use homeport_proto::{auth_cookie_name, PortRecord, ShareMode, AUTH_SUBPATH};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cookies::cookie_value;
use crate::middleware::session_token;

/// How the request reached the port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// `/{port}/...`
    Primary,
    /// Resolved by the fallback router from `Referer` or the context cookie
    Asset,
}

#[derive(Debug)]
pub struct AccessRequest<'a> {
    pub port: u16,
    pub entry: EntryPoint,
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub client_ip: IpAddr,
}

impl AccessRequest<'_> {
    /// `POST /{port}/_auth` on the primary entry
    pub fn is_auth_submission(&self) -> bool {
        self.entry == EntryPoint::Primary
            && self.method == Method::POST
            && self
                .uri
                .path()
                .strip_prefix('/')
                .and_then(|p| p.strip_prefix(self.port.to_string().as_str()))
                .is_some_and(|rest| rest == AUTH_SUBPATH)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow { authenticated: bool },
    RedirectToLogin { location: String },
    /// Asset request to a private port without a session
    Deny,
    /// Render the password form (401)
    Challenge,
    RateLimited { retry_after: Duration },
    /// Check the submitted password against this hash
    VerifyPassword { password_hash: String },
    /// No record and unregistered forwarding is disabled
    NotRegistered,
}

#[derive(Debug)]
pub enum PasswordOutcome {
    Granted(AuthCookie),
    Rejected { failures: u32 },
    /// Refused before verification
    Limited { retry_after: Duration },
}

pub struct SharingPolicy {
    sessions: Arc<dyn SessionValidator>,
    cookies: CookieSigner,
    limiter: Arc<RateLimiter>,
    dev_mode: bool,
    forward_unregistered: bool,
    login_path: String,
}

impl SharingPolicy {
    pub fn new(
        sessions: Arc<dyn SessionValidator>,
        cookies: CookieSigner,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            sessions,
            cookies,
            limiter,
            dev_mode: false,
            forward_unregistered: true,
            login_path: "/login".to_string(),
        }
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn with_forward_unregistered(mut self, forward: bool) -> Self {
        self.forward_unregistered = forward;
        self
    }

    pub fn with_login_path(mut self, login_path: impl Into<String>) -> Self {
        self.login_path = login_path.into();
        self
    }

    pub fn sessions(&self) -> Arc<dyn SessionValidator> {
        self.sessions.clone()
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    pub fn evaluate(
        &self,
        request: &AccessRequest<'_>,
        record: Option<&PortRecord>,
        now: DateTime<Utc>,
    ) -> Decision {
        let Some(record) = record else {
            if self.forward_unregistered {
                warn!(
                    port = request.port,
                    "Forwarding to unregistered port (best effort)"
                );
                return Decision::Allow {
                    authenticated: false,
                };
            }
            return Decision::NotRegistered;
        };

        match record.effective_mode(now) {
            ShareMode::Public => Decision::Allow {
                authenticated: false,
            },
            ShareMode::Private => self.evaluate_private(request),
            ShareMode::Password => self.evaluate_password(request, record, now),
        }
    }

    fn evaluate_private(&self, request: &AccessRequest<'_>) -> Decision {
        if self.has_session(request.headers) {
            return Decision::Allow {
                authenticated: true,
            };
        }
        if self.dev_mode {
            return Decision::Allow {
                authenticated: false,
            };
        }

        match request.entry {
            EntryPoint::Primary => Decision::RedirectToLogin {
                location: self.login_location(request.uri),
            },
            EntryPoint::Asset => Decision::Deny,
        }
    }

    fn evaluate_password(
        &self,
        request: &AccessRequest<'_>,
        record: &PortRecord,
        now: DateTime<Utc>,
    ) -> Decision {
        // effective_mode only reports Password when a hash is present
        let password_hash = record.password_hash.as_deref().unwrap_or_default();

        if let Some(value) = cookie_value(request.headers, &auth_cookie_name(request.port)) {
            match self.cookies.verify(value, request.port, password_hash, now) {
                Ok(_) => {
                    return Decision::Allow {
                        authenticated: true,
                    }
                }
                Err(e) => debug!(port = request.port, error = %e, "Rejected auth cookie"),
            }
        }

        if let RateLimitStatus::Limited { retry_after } = self.limiter.check(request.client_ip) {
            return Decision::RateLimited { retry_after };
        }

        if request.is_auth_submission() {
            return Decision::VerifyPassword {
                password_hash: password_hash.to_string(),
            };
        }

        Decision::Challenge
    }

    pub fn has_session(&self, headers: &HeaderMap) -> bool {
        session_token(headers).is_some_and(|token| self.sessions.validate(&token).is_ok())
    }

    fn login_location(&self, uri: &Uri) -> String {
        let next = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let query = serde_urlencoded::to_string(vec![("next", next)]).unwrap_or_default();
        let separator = if self.login_path.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.login_path, separator, query)
    }

    /// Verify a submitted password and apply the side effects of the result.
    ///
    /// The caller's attempt is reserved on the rate limiter first; when no
    /// slot is left the password is never checked. A match clears the
    /// caller's failure count and issues a fresh cookie; a mismatch records
    /// a failure.
    pub async fn submit_password(
        &self,
        port: u16,
        password_hash: String,
        submitted: String,
        client_ip: IpAddr,
        now: DateTime<Utc>,
    ) -> Result<PasswordOutcome, PasswordError> {
        let permit = match self.limiter.try_acquire(client_ip) {
            Ok(permit) => permit,
            Err(retry_after) => {
                warn!(port, %client_ip, "Password attempt refused by rate limiter");
                return Ok(PasswordOutcome::Limited { retry_after });
            }
        };

        let hash = password_hash.clone();
        let matched = tokio::task::spawn_blocking(move || verify_password(&submitted, &hash))
            .await
            .map_err(|e| PasswordError::VerificationFailed(e.to_string()))??;

        if matched {
            permit.succeeded();
            info!(port, %client_ip, "Password challenge passed");
            Ok(PasswordOutcome::Granted(
                self.cookies.issue(port, &password_hash, now),
            ))
        } else {
            let failures = permit.failed();
            warn!(port, %client_ip, failures, "Password challenge failed");
            Ok(PasswordOutcome::Rejected { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use homeport_auth::{hash_password, JwtSessionValidator};
    use homeport_proto::{ObservedPort, ShareSettings};
    use std::net::Ipv4Addr;

    const SESSION_SECRET: &[u8] = b"session-secret";

    fn policy() -> SharingPolicy {
        SharingPolicy::new(
            Arc::new(JwtSessionValidator::new(SESSION_SECRET)),
            CookieSigner::new(b"cookie-secret".to_vec(), ChronoDuration::hours(24)).unwrap(),
            Arc::new(RateLimiter::new(5, Duration::from_secs(900))),
        )
    }

    fn record(port: u16, settings: ShareSettings) -> PortRecord {
        let mut record = PortRecord::from_observation(&ObservedPort::unresolved(port), Utc::now());
        record.apply_share(&settings);
        record
    }

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4))
    }

    fn eval(
        policy: &SharingPolicy,
        method: Method,
        path: &str,
        headers: &HeaderMap,
        entry: EntryPoint,
        record: Option<&PortRecord>,
    ) -> Decision {
        let uri: Uri = path.parse().unwrap();
        let port = record.map(|r| r.port).unwrap_or(6000);
        let request = AccessRequest {
            port,
            entry,
            method: &method,
            uri: &uri,
            headers,
            client_ip: ip(),
        };
        policy.evaluate(&request, record, Utc::now())
    }

    #[test]
    fn test_public_allows_anonymous() {
        let rec = record(4000, ShareSettings::public(None));
        let decision = eval(
            &policy(),
            Method::GET,
            "/4000/",
            &HeaderMap::new(),
            EntryPoint::Primary,
            Some(&rec),
        );
        assert_eq!(
            decision,
            Decision::Allow {
                authenticated: false
            }
        );
    }

    #[test]
    fn test_private_redirects_navigation_and_denies_assets() {
        let rec = record(4000, ShareSettings::private());
        let p = policy();

        let decision = eval(
            &p,
            Method::GET,
            "/4000/admin?tab=1",
            &HeaderMap::new(),
            EntryPoint::Primary,
            Some(&rec),
        );
        assert_eq!(
            decision,
            Decision::RedirectToLogin {
                location: "/login?next=%2F4000%2Fadmin%3Ftab%3D1".to_string()
            }
        );

        let decision = eval(
            &p,
            Method::GET,
            "/main.js",
            &HeaderMap::new(),
            EntryPoint::Asset,
            Some(&rec),
        );
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn test_private_allows_session_and_dev_mode() {
        let rec = record(4000, ShareSettings::private());
        let token = JwtSessionValidator::new(SESSION_SECRET)
            .issue("owner", ChronoDuration::hours(1))
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );

        for entry in [EntryPoint::Primary, EntryPoint::Asset] {
            assert_eq!(
                eval(&policy(), Method::GET, "/4000/", &headers, entry, Some(&rec)),
                Decision::Allow {
                    authenticated: true
                }
            );
        }

        let dev = policy().with_dev_mode(true);
        assert_eq!(
            eval(
                &dev,
                Method::GET,
                "/4000/",
                &HeaderMap::new(),
                EntryPoint::Primary,
                Some(&rec)
            ),
            Decision::Allow {
                authenticated: false
            }
        );
    }

    #[test]
    fn test_expired_share_reads_as_private() {
        let rec = record(
            4000,
            ShareSettings::public(Some(Utc::now() - ChronoDuration::minutes(1))),
        );
        assert_eq!(rec.share_mode, ShareMode::Public);
        let decision = eval(
            &policy(),
            Method::GET,
            "/4000/",
            &HeaderMap::new(),
            EntryPoint::Asset,
            Some(&rec),
        );
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn test_password_challenge_and_submission() {
        let hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2g";
        let rec = record(
            5000,
            ShareSettings::password(hash.to_string(), None).unwrap(),
        );
        let p = policy();

        assert_eq!(
            eval(
                &p,
                Method::GET,
                "/5000/",
                &HeaderMap::new(),
                EntryPoint::Primary,
                Some(&rec)
            ),
            Decision::Challenge
        );
        assert_eq!(
            eval(
                &p,
                Method::POST,
                "/5000/_auth",
                &HeaderMap::new(),
                EntryPoint::Primary,
                Some(&rec)
            ),
            Decision::VerifyPassword {
                password_hash: hash.to_string()
            }
        );
        assert_eq!(
            eval(
                &p,
                Method::POST,
                "/5000/_auth/extra",
                &HeaderMap::new(),
                EntryPoint::Primary,
                Some(&rec)
            ),
            Decision::Challenge
        );
    }

    #[test]
    fn test_password_cookie_is_port_bound() {
        let hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2g";
        let p = policy();
        let cookie = p.cookies.issue(5000, hash, Utc::now());

        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            format!("{}={}", cookie.name(), cookie.value).parse().unwrap(),
        );

        let rec = record(5000, ShareSettings::password(hash.to_string(), None).unwrap());
        assert_eq!(
            eval(&p, Method::GET, "/5000/x", &headers, EntryPoint::Primary, Some(&rec)),
            Decision::Allow {
                authenticated: true
            }
        );

        // Presenting port 5000's cookie value under port 5001's name
        let other = record(5001, ShareSettings::password(hash.to_string(), None).unwrap());
        let mut forged = HeaderMap::new();
        forged.insert(
            "cookie",
            format!("homeport_auth_5001={}", cookie.value).parse().unwrap(),
        );
        assert_eq!(
            eval(&p, Method::GET, "/5001/", &forged, EntryPoint::Primary, Some(&other)),
            Decision::Challenge
        );
    }

    #[test]
    fn test_rate_limited_before_verification() {
        let rec = record(
            5000,
            ShareSettings::password("$argon2id$hash".to_string(), None).unwrap(),
        );
        let p = policy();
        for _ in 0..5 {
            p.limiter.record_failure(ip());
        }

        assert!(matches!(
            eval(
                &p,
                Method::POST,
                "/5000/_auth",
                &HeaderMap::new(),
                EntryPoint::Primary,
                Some(&rec)
            ),
            Decision::RateLimited { .. }
        ));
    }

    #[test]
    fn test_unregistered_port() {
        assert_eq!(
            eval(
                &policy(),
                Method::GET,
                "/6000/",
                &HeaderMap::new(),
                EntryPoint::Primary,
                None
            ),
            Decision::Allow {
                authenticated: false
            }
        );
        assert_eq!(
            eval(
                &policy().with_forward_unregistered(false),
                Method::GET,
                "/6000/",
                &HeaderMap::new(),
                EntryPoint::Primary,
                None
            ),
            Decision::NotRegistered
        );
    }

    #[tokio::test]
    async fn test_submit_password_outcomes() {
        let hash = hash_password("secret123").unwrap();
        let p = policy();
        let now = Utc::now();

        let outcome = p
            .submit_password(5000, hash.clone(), "wrong".to_string(), ip(), now)
            .await
            .unwrap();
        assert!(matches!(outcome, PasswordOutcome::Rejected { failures: 1 }));

        let outcome = p
            .submit_password(5000, hash.clone(), "secret123".to_string(), ip(), now)
            .await
            .unwrap();
        let PasswordOutcome::Granted(cookie) = outcome else {
            panic!("expected cookie");
        };
        assert_eq!(cookie.port, 5000);
        assert!(p.cookies.verify(&cookie.value, 5000, &hash, now).is_ok());
        assert_eq!(p.limiter.tracked(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_submissions_verify_at_most_limit() {
        let hash = hash_password("secret123").unwrap();
        let p = Arc::new(policy());
        let now = Utc::now();

        let tasks: Vec<_> = (0..30)
            .map(|_| {
                let p = p.clone();
                let hash = hash.clone();
                tokio::spawn(async move {
                    p.submit_password(5000, hash, "wrong".to_string(), ip(), now)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut rejected = 0;
        let mut limited = 0;
        for task in tasks {
            match task.await.unwrap() {
                PasswordOutcome::Rejected { .. } => rejected += 1,
                PasswordOutcome::Limited { .. } => limited += 1,
                PasswordOutcome::Granted(_) => panic!("wrong password granted"),
            }
        }

        assert_eq!(rejected, 5);
        assert_eq!(limited, 25);

        // The correct password is refused too once the budget is spent
        let outcome = p
            .submit_password(5000, hash, "secret123".to_string(), ip(), now)
            .await
            .unwrap();
        assert!(matches!(outcome, PasswordOutcome::Limited { .. }));
    }
}
