//! Runtime wiring from a validated [`Config`].

use std::sync::Arc;

use salsag_ledger::{LedgerStore, ObjectStore, TransparencyLog, TrustError};
use salsag_store::{FsLedgerStore, FsObjectStore};
use tracing::debug;

use crate::config::{Config, SignerBackend};
use crate::pipeline::{Orchestrator, PipelineOptions};
use crate::signing::{
    identity_token_from_env, resolve_identity, ArtifactSigner, CosignSigner, CosignVerifier, EphemeralSigner,
    EphemeralVerifier, SignatureVerifier, SignerError,
};
use crate::status::StatusReporter;
use crate::transparency::RekorLog;
use crate::verifier::Verifier;

pub struct Runtime {
    pub config: Config,
    pub objects: Arc<dyn ObjectStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub transparency: Option<Arc<dyn TransparencyLog>>,
}

impl Runtime {
    /// Open the stores named by `config`. The config must already be
    /// validated.
    pub fn open(config: Config) -> Result<Self, TrustError> {
        let timeouts = config.timeouts();
        let storage = &config.storage;

        let objects = FsObjectStore::new(&storage.root, storage.bucket.clone())
            .map_err(|e| TrustError::store_unavailable(format!("cannot open object store: {}", e)))?;
        let ledger = FsLedgerStore::new(storage.ledger_dir())
            .map_err(|e| TrustError::store_unavailable(format!("cannot open ledger: {}", e)))?
            .with_lock_timeout(timeouts.lock());

        let transparency: Option<Arc<dyn TransparencyLog>> = if config.transparency.enabled {
            let log = RekorLog::new(&config.transparency.url, timeouts.transparency())
                .map_err(|e| TrustError::config(format!("transparency client: {}", e)))?;
            Some(Arc::new(log) as Arc<dyn TransparencyLog>)
        } else {
            None
        };

        debug!(
            root = %storage.root.display(),
            bucket = %storage.bucket,
            table = %storage.table,
            transparency = transparency.is_some(),
            "runtime opened"
        );

        Ok(Self {
            objects: Arc::new(objects),
            ledger: Arc::new(ledger),
            transparency,
            config,
        })
    }

    pub fn signer(&self) -> Result<Arc<dyn ArtifactSigner>, TrustError> {
        let signing = &self.config.signing;
        let identity = resolve_identity(signing.identity.as_deref()).ok_or(SignerError::NoIdentity)?;
        let signer: Arc<dyn ArtifactSigner> = match signing.backend {
            SignerBackend::Cosign => Arc::new(
                CosignSigner::new(signing.cosign_path.clone(), identity, self.config.timeouts().signing())
                    .with_oidc_issuer(signing.oidc_issuer.clone()),
            ),
            SignerBackend::Ephemeral => Arc::new(EphemeralSigner::new(identity)),
        };
        Ok(signer)
    }

    pub fn orchestrator(&self) -> Result<Orchestrator, TrustError> {
        let pattern = self.config.signing.identity_pattern()?;
        let options =
            PipelineOptions::from_config(&self.config.artifacts).with_identity_token(identity_token_from_env());
        Ok(
            Orchestrator::new(self.objects.clone(), self.ledger.clone(), self.signer()?, pattern)
                .with_transparency(self.transparency.clone())
                .with_options(options),
        )
    }

    /// Checker for stored signatures, matching the configured backend.
    pub fn signature_verifier(&self) -> Arc<dyn SignatureVerifier> {
        let signing = &self.config.signing;
        match signing.backend {
            SignerBackend::Cosign => Arc::new(CosignVerifier::new(
                signing.cosign_path.clone(),
                format!("^(?:{})$", signing.identity_regexp),
                signing.oidc_issuer.clone(),
                self.config.timeouts().signing(),
            )),
            SignerBackend::Ephemeral => Arc::new(EphemeralVerifier),
        }
    }

    pub fn verifier(&self) -> Verifier {
        Verifier::new(self.ledger.clone())
            .with_objects(self.objects.clone())
            .with_transparency(self.transparency.clone())
            .with_signatures(Some(self.signature_verifier()))
            .recording(self.config.verification.record_observations)
    }

    pub fn status(&self) -> StatusReporter {
        StatusReporter::new(self.ledger.clone())
    }
}
