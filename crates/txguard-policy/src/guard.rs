//! The per-request pipeline.
//!
//! [`RequestGuard`] owns every policy component and is what a transport
//! adapter calls once per inbound request:
//!
//! 1. reject banned source IPs before anything else runs;
//! 2. classify the request;
//! 3. consult the access-control policy for the signer, if one is attached
//!    (state queries name the queried account, not the caller, and skip it);
//! 4. update client telemetry;
//! 5. record the (ip, signer) association and, for transaction submissions,
//!    run the sybil state machine and apply its decision to the staging gate.
//!
//! Nothing here blocks on I/O except the optional [`AccessPolicy`] lookup in
//! [`RequestGuard::inspect`]. Async adapters split the pipeline with
//! [`RequestGuard::screen`] and [`RequestGuard::admit`] and bound the lookup
//! themselves.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use txguard_core::address::Address;
use txguard_core::clock::Clock;
use txguard_core::error::{ConfigError, GuardError, StoreError};
use txguard_core::traits::AccessPolicy;
use txguard_core::types::{AccessState, RequestKind};

use crate::classifier::{ClassifiedRequest, InboundRequest, RequestClassifier};
use crate::clients::ClientRegistry;
use crate::config::GuardConfig;
use crate::detector::AbuseDetector;
use crate::escalator::{IpBanEscalator, IpBanList, RuleViolation};
use crate::registry::IpSignerRegistry;
use crate::stage::StagePolicyGate;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    IpBanned(IpAddr),
    AccessDenied(Address),
}

impl From<RejectReason> for GuardError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::IpBanned(ip) => GuardError::IpBanned(ip),
            RejectReason::AccessDenied(address) => GuardError::AccessDenied(address),
        }
    }
}

/// Outcome of [`RequestGuard::inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Proceed(ClassifiedRequest),
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed(_))
    }

    /// Convert into a `Result` for callers that propagate with `?`.
    pub fn into_result(self) -> Result<ClassifiedRequest, GuardError> {
        match self {
            Self::Proceed(classified) => Ok(classified),
            Self::Reject(reason) => Err(reason.into()),
        }
    }
}

/// Composition of the abuse-policy components.
pub struct RequestGuard {
    classifier: RequestClassifier,
    registry: IpSignerRegistry,
    detector: AbuseDetector,
    stage: Arc<StagePolicyGate>,
    escalator: IpBanEscalator,
    clients: ClientRegistry,
    access: Option<Arc<dyn AccessPolicy>>,
    clock: Arc<dyn Clock>,
}

impl RequestGuard {
    /// Build a guard with fresh state. Fails if `config` does not validate.
    pub fn new(config: &GuardConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let bans = Arc::new(IpBanList::new());
        Ok(Self {
            classifier: RequestClassifier::new(config.trust_proxy_headers),
            registry: IpSignerRegistry::new(),
            detector: AbuseDetector::new(config)?,
            stage: Arc::new(StagePolicyGate::new()),
            escalator: IpBanEscalator::new(config.ip_ban_threshold_count, bans),
            clients: ClientRegistry::new(),
            access: None,
            clock,
        })
    }

    /// Attach an access-control policy consulted for every signer.
    pub fn with_access_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.access = Some(policy);
        self
    }

    /// Run the pipeline for one request, consulting the attached access
    /// policy inline.
    pub fn inspect(&self, request: &InboundRequest) -> Verdict {
        let classified = match self.screen(request) {
            Ok(classified) => classified,
            Err(reason) => return Verdict::Reject(reason),
        };
        let access = match (&self.access, classified.access_subject()) {
            (Some(policy), Some(subject)) => Some(policy.access_state(&subject)),
            _ => None,
        };
        self.admit(classified, access)
    }

    /// First half of the pipeline: reject banned source IPs, then classify.
    ///
    /// Callers that resolve access state off-thread run this, look up
    /// [`ClassifiedRequest::access_subject`], and finish with [`admit`](Self::admit).
    pub fn screen(&self, request: &InboundRequest) -> Result<ClassifiedRequest, RejectReason> {
        if let Some(ip) = self.classifier.client_ip(request) {
            if self.ip_bans().is_banned(&ip) {
                debug!(%ip, method = %request.method, "guard: request from banned ip rejected");
                return Err(RejectReason::IpBanned(ip));
            }
        }
        Ok(self.classifier.classify(request))
    }

    /// Second half of the pipeline. `access` is the looked-up state of the
    /// request's access subject, or `None` when no lookup was made. A failed
    /// lookup admits the request.
    pub fn admit(
        &self,
        classified: ClassifiedRequest,
        access: Option<Result<AccessState, StoreError>>,
    ) -> Verdict {
        let Some(signer) = classified.signer else {
            return Verdict::Proceed(classified);
        };

        let mut exempt = false;
        match access {
            Some(Ok(AccessState::Denied)) => {
                info!(address = %signer, ip = ?classified.ip, kind = %classified.kind,
                    "guard: denied address rejected");
                return Verdict::Reject(RejectReason::AccessDenied(signer));
            }
            Some(Ok(AccessState::Whitelisted)) => exempt = true,
            Some(Ok(AccessState::Allowed)) | None => {}
            Some(Err(e)) => error!(address = %signer, error = %e,
                "guard: access-control lookup failed, admitting"),
        }

        self.record_client(&classified, signer);

        if classified.kind == RequestKind::StateQuery {
            return Verdict::Proceed(classified);
        }

        let Some(ip) = classified.ip else {
            warn!(address = %signer, kind = %classified.kind,
                "guard: no client ip, skipping ip tracking");
            return Verdict::Proceed(classified);
        };

        let associated = self.registry.record(ip, signer);
        if classified.kind.is_submission() && !exempt {
            let now = self.clock.now();
            self.detector.evaluate_with(&signer, &ip, associated, now, |decision| {
                self.stage.apply(&signer, ip, decision, now)
            });
        }

        info!(%ip, kind = %classified.kind, address = %signer, associated,
            action = classified.action_name.as_deref().unwrap_or("-"),
            "guard: request captured");
        Verdict::Proceed(classified)
    }

    // Submissions only fill in device and IP for signers seen for the first
    // time; registration calls refresh them on every request.
    fn record_client(&self, classified: &ClassifiedRequest, signer: Address) {
        let refresh = match classified.kind {
            RequestKind::StateQuery => {
                let count = self.clients.record_state_query(&signer);
                debug!(address = %signer, ip = ?classified.ip, count, "guard: state query");
                return;
            }
            RequestKind::PutTransaction | RequestKind::StageTransaction => {
                self.clients.record_tx_submission(&signer);
                self.clients.add_client(signer)
            }
            _ => {
                self.clients.add_client(signer);
                true
            }
        };
        if refresh {
            self.clients.set_device(&signer, classified.device);
            if let Some(ip) = classified.ip {
                self.clients.add_client_ip(&signer, ip);
            }
        }
    }

    /// Feed a rate-limit violation to the IP ban escalator. Returns `true` if
    /// the IP was banned by this call.
    pub fn on_rule_violation(&self, violation: &RuleViolation) -> bool {
        self.escalator.on_rule_violation(violation, self.clock.now())
    }

    /// Administratively return `agent` to clean: drop its tracking record
    /// and lift any staging ban. Returns `true` if anything changed.
    pub fn release_agent(&self, agent: &Address) -> bool {
        let forgotten = self.detector.forget(agent).is_some();
        let unbanned = self.stage.unban(agent, None, self.clock.now());
        forgotten || unbanned
    }

    pub fn is_staging_banned(&self, agent: &Address) -> bool {
        self.stage.banned_at(agent).is_some()
    }

    pub fn classifier(&self) -> &RequestClassifier {
        &self.classifier
    }

    pub fn registry(&self) -> &IpSignerRegistry {
        &self.registry
    }

    pub fn detector(&self) -> &AbuseDetector {
        &self.detector
    }

    /// Shared handle to the staging gate, for the transaction admission path.
    pub fn stage_gate(&self) -> &Arc<StagePolicyGate> {
        &self.stage
    }

    pub fn ip_bans(&self) -> &Arc<IpBanList> {
        self.escalator.ban_list()
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for RequestGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGuard")
            .field("tracked_ips", &self.registry.tracked_ips())
            .field("tracked_agents", &self.detector.len())
            .field("staging_banned", &self.stage.len())
            .field("ip_banned", &self.ip_bans().len())
            .field("access_policy", &self.access.is_some())
            .finish()
    }
}
