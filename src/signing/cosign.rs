//! `cosign sign-blob` and `cosign verify-blob` adapters.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use salsag_ledger::{LogRef, SignatureCheck};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ArtifactSigner, SignatureEvidence, SignatureVerifier, SignedArtifact, SignerError, SigningRequest};
use crate::timeout::wait_with_deadline;

/// Scratch directory removed on drop.
struct WorkDir(PathBuf);

impl WorkDir {
    fn create() -> std::io::Result<Self> {
        let path = std::env::temp_dir().join(format!("salsag-sign-{}", ulid::Ulid::new()));
        fs::create_dir_all(&path)?;
        Ok(Self(path))
    }

    fn join(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// Run `cmd` to completion within `timeout`, stderr captured to `stderr_path`.
fn run(program: &str, cmd: &mut Command, stderr_path: &Path, timeout: Duration) -> Result<ExitStatus, SignerError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(File::create(stderr_path)?))
        .spawn()
        .map_err(|source| SignerError::Spawn {
            program: program.to_string(),
            source,
        })?;
    wait_with_deadline(&mut child, timeout)?.ok_or(SignerError::Timeout(timeout))
}

/// Last few lines of captured stderr.
fn stderr_tail(stderr_path: &Path) -> String {
    let stderr = fs::read_to_string(stderr_path).unwrap_or_default();
    let lines: Vec<&str> = stderr.lines().collect();
    lines[lines.len().saturating_sub(5)..].join("\n")
}

pub struct CosignSigner {
    program: String,
    prefix_args: Vec<String>,
    identity: String,
    oidc_issuer: Option<String>,
    timeout: Duration,
}

impl CosignSigner {
    pub fn new(program: impl Into<String>, identity: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            identity: identity.into(),
            oidc_issuer: None,
            timeout,
        }
    }

    /// OIDC issuer passed as `--oidc-issuer` for keyless signing.
    pub fn with_oidc_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.oidc_issuer = Some(issuer.into());
        self
    }

    /// Arguments placed before `sign-blob`, for wrapper launchers.
    #[cfg(test)]
    fn with_prefix_args(mut self, args: Vec<String>) -> Self {
        self.prefix_args = args;
        self
    }

    fn command(&self, artifact: &Path, signature: &Path, certificate: &Path, bundle: &Path, token: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .arg("sign-blob")
            .arg("--yes")
            .arg("--bundle")
            .arg(bundle)
            .arg("--output-signature")
            .arg(signature)
            .arg("--output-certificate")
            .arg(certificate);
        if let Some(issuer) = &self.oidc_issuer {
            cmd.arg("--oidc-issuer").arg(issuer);
        }
        if let Some(token) = token {
            cmd.arg("--identity-token").arg(token);
        }
        cmd.arg(artifact);
        cmd
    }
}

impl ArtifactSigner for CosignSigner {
    fn backend(&self) -> &'static str {
        "cosign"
    }

    fn sign(&self, request: &SigningRequest<'_>) -> Result<SignedArtifact, SignerError> {
        let work = WorkDir::create()?;
        let artifact = work.join("artifact");
        let signature_path = work.join("artifact.sig");
        let certificate_path = work.join("artifact.pem");
        let bundle_path = work.join("artifact.bundle");
        let stderr_path = work.join("stderr.log");
        fs::write(&artifact, request.bytes)?;

        let mut cmd = self.command(
            &artifact,
            &signature_path,
            &certificate_path,
            &bundle_path,
            request.identity_token,
        );
        let status = run(&self.program, &mut cmd, &stderr_path, self.timeout)?;
        if !status.success() {
            return Err(SignerError::Failed {
                status: status.to_string(),
                stderr: stderr_tail(&stderr_path),
            });
        }

        let signature = read_output(&signature_path, "signature")?;
        let certificate = read_output(&certificate_path, "certificate")?;

        let transparency_log_ref = match fs::read(&bundle_path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(bundle) => log_ref_from_bundle(&bundle),
                Err(e) => {
                    warn!(object_key = request.object_key, error = %e, "cosign bundle is not JSON");
                    None
                }
            },
            Err(_) => None,
        };
        debug!(
            object_key = request.object_key,
            log_ref = ?transparency_log_ref,
            "cosign signing complete"
        );

        Ok(SignedArtifact {
            signature,
            certificate,
            signer_identity: self.identity.clone(),
            transparency_log_ref,
        })
    }
}

/// `cosign verify-blob` over stored evidence.
///
/// The certificate must name an identity matching `identity_regexp` issued
/// by `oidc_issuer`. The transparency log is checked separately by the
/// verifier, so cosign runs with `--insecure-ignore-tlog`.
pub struct CosignVerifier {
    program: String,
    prefix_args: Vec<String>,
    identity_regexp: String,
    oidc_issuer: String,
    timeout: Duration,
}

impl CosignVerifier {
    pub fn new(
        program: impl Into<String>,
        identity_regexp: impl Into<String>,
        oidc_issuer: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            identity_regexp: identity_regexp.into(),
            oidc_issuer: oidc_issuer.into(),
            timeout,
        }
    }

    #[cfg(test)]
    fn with_prefix_args(mut self, args: Vec<String>) -> Self {
        self.prefix_args = args;
        self
    }
}

impl SignatureVerifier for CosignVerifier {
    fn backend(&self) -> &'static str {
        "cosign"
    }

    fn verify(&self, evidence: &SignatureEvidence<'_>) -> Result<SignatureCheck, SignerError> {
        let work = WorkDir::create()?;
        let artifact = work.join("artifact");
        let signature_path = work.join("artifact.sig");
        let certificate_path = work.join("artifact.pem");
        let stderr_path = work.join("stderr.log");
        fs::write(&artifact, evidence.bytes)?;
        fs::write(&signature_path, evidence.signature)?;
        fs::write(&certificate_path, evidence.certificate)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .arg("verify-blob")
            .arg("--signature")
            .arg(&signature_path)
            .arg("--certificate")
            .arg(&certificate_path)
            .arg("--certificate-identity-regexp")
            .arg(&self.identity_regexp)
            .arg("--certificate-oidc-issuer")
            .arg(&self.oidc_issuer)
            .arg("--insecure-ignore-tlog")
            .arg(&artifact);

        let status = run(&self.program, &mut cmd, &stderr_path, self.timeout)?;
        debug!(object_key = evidence.object_key, status = %status, "cosign verify-blob finished");
        if status.success() {
            Ok(SignatureCheck::Valid)
        } else {
            Ok(SignatureCheck::Invalid {
                message: format!("cosign verify-blob exited with {}: {}", status, stderr_tail(&stderr_path)),
            })
        }
    }
}

fn read_output(path: &Path, what: &'static str) -> Result<Vec<u8>, SignerError> {
    match fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        _ => Err(SignerError::MissingOutput(what)),
    }
}

/// Transparency log reference recorded in a cosign bundle.
///
/// Checks `rekorBundle.logEntry.uuid`, then `rekorBundle.logEntry.logID`,
/// then the numeric `rekorBundle.Payload.logIndex`.
pub fn log_ref_from_bundle(bundle: &Value) -> Option<LogRef> {
    let rekor = bundle.get("rekorBundle")?;
    let entry = rekor.get("logEntry");
    for field in ["uuid", "logID"] {
        if let Some(s) = entry.and_then(|e| e.get(field)).and_then(Value::as_str) {
            if !s.is_empty() {
                return Some(LogRef::new(s));
            }
        }
    }
    rekor
        .get("Payload")
        .and_then(|p| p.get("logIndex"))
        .and_then(Value::as_u64)
        .map(|index| LogRef::new(index.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use salsag_ledger::digest;
    use serde_json::json;

    #[test]
    fn test_log_ref_from_bundle_variants() {
        let uuid = json!({"rekorBundle": {"logEntry": {"uuid": "abc"}}});
        assert_eq!(log_ref_from_bundle(&uuid), Some(LogRef::new("abc")));

        let log_id = json!({"rekorBundle": {"logEntry": {"logID": "def"}}});
        assert_eq!(log_ref_from_bundle(&log_id), Some(LogRef::new("def")));

        let index = json!({"rekorBundle": {"Payload": {"logIndex": 42}}});
        assert_eq!(log_ref_from_bundle(&index), Some(LogRef::new("42")));

        assert_eq!(log_ref_from_bundle(&json!({})), None);
    }

    #[cfg(unix)]
    fn fake_cosign(dir: &Path, body: &str) -> CosignSigner {
        let script = dir.join("fake-cosign.sh");
        fs::write(
            &script,
            format!(
                r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --bundle) bundle="$2"; shift 2;;
    --output-signature) sig="$2"; shift 2;;
    --output-certificate) cert="$2"; shift 2;;
    --identity-token) shift 2;;
    --oidc-issuer) issuer="$2"; shift 2;;
    *) shift;;
  esac
done
{}
"#,
                body
            ),
        )
        .unwrap();
        CosignSigner::new("sh", "https://github.com/org/repo", Duration::from_secs(5))
            .with_prefix_args(vec![script.display().to_string()])
    }

    #[test]
    #[cfg(unix)]
    fn test_cosign_success_reads_outputs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let signer = fake_cosign(
            tmp.path(),
            r#"printf 'c2ln' > "$sig"; printf 'CERT' > "$cert"; printf '{"rekorBundle":{"logEntry":{"uuid":"u-1"}}}' > "$bundle""#,
        );
        let bytes = b"artifact";
        let out = signer
            .sign(&SigningRequest {
                object_key: "app",
                bytes,
                digest: digest(bytes),
                identity_token: Some("tok"),
            })
            .unwrap();
        assert_eq!(out.signature, b"c2ln");
        assert_eq!(out.certificate, b"CERT");
        assert_eq!(out.transparency_log_ref, Some(LogRef::new("u-1")));
        assert_eq!(out.signer_identity, "https://github.com/org/repo");
    }

    #[test]
    #[cfg(unix)]
    fn test_cosign_failure_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let signer = fake_cosign(tmp.path(), "echo 'no oidc token' >&2; exit 3");
        let err = signer
            .sign(&SigningRequest {
                object_key: "app",
                bytes: b"x",
                digest: digest(b"x"),
                identity_token: None,
            })
            .unwrap_err();
        match err {
            SignerError::Failed { stderr, .. } => assert!(stderr.contains("no oidc token")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_cosign_missing_signature() {
        let tmp = tempfile::TempDir::new().unwrap();
        let signer = fake_cosign(tmp.path(), r#"printf 'CERT' > "$cert""#);
        let err = signer
            .sign(&SigningRequest {
                object_key: "app",
                bytes: b"x",
                digest: digest(b"x"),
                identity_token: None,
            })
            .unwrap_err();
        assert!(matches!(err, SignerError::MissingOutput("signature")));
    }

    #[test]
    #[cfg(unix)]
    fn test_cosign_passes_oidc_issuer() {
        let tmp = tempfile::TempDir::new().unwrap();
        let signer = fake_cosign(tmp.path(), r#"printf 'c2ln' > "$sig"; printf '%s' "$issuer" > "$cert""#)
            .with_oidc_issuer("https://token.actions.githubusercontent.com");
        let out = signer
            .sign(&SigningRequest {
                object_key: "app",
                bytes: b"x",
                digest: digest(b"x"),
                identity_token: None,
            })
            .unwrap();
        assert_eq!(out.certificate, b"https://token.actions.githubusercontent.com");
    }

    /// Accepts only the signature `good` and requires the identity flags.
    #[cfg(unix)]
    fn fake_verify_blob(dir: &Path) -> CosignVerifier {
        let script = dir.join("fake-verify.sh");
        fs::write(
            &script,
            r#"
[ "$1" = "verify-blob" ] || exit 64
while [ $# -gt 0 ]; do
  case "$1" in
    --signature) sig="$2"; shift 2;;
    --certificate-identity-regexp) re="$2"; shift 2;;
    --certificate-oidc-issuer) iss="$2"; shift 2;;
    *) shift;;
  esac
done
[ -n "$re" ] && [ -n "$iss" ] || { echo 'missing identity flags' >&2; exit 2; }
[ "$(cat "$sig")" = "good" ] || { echo 'none of the expected identities matched' >&2; exit 1; }
"#,
        )
        .unwrap();
        CosignVerifier::new(
            "sh",
            "^https://github.com/org/.*$",
            "https://token.actions.githubusercontent.com",
            Duration::from_secs(5),
        )
        .with_prefix_args(vec![script.display().to_string()])
    }

    #[cfg(unix)]
    fn evidence<'a>(signature: &'a [u8]) -> SignatureEvidence<'a> {
        SignatureEvidence {
            object_key: "app",
            bytes: b"artifact",
            digest: digest(b"artifact"),
            signature,
            certificate: b"CERT",
            signer_identity: "https://github.com/org/repo",
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_verify_blob_outcomes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let verifier = fake_verify_blob(tmp.path());
        assert_eq!(verifier.verify(&evidence(b"good")).unwrap(), SignatureCheck::Valid);

        match verifier.verify(&evidence(b"swapped")).unwrap() {
            SignatureCheck::Invalid { message } => assert!(message.contains("none of the expected identities")),
            other => panic!("unexpected check: {other:?}"),
        }
    }

    #[test]
    fn test_verify_blob_without_cosign_is_error() {
        let verifier = CosignVerifier::new("/nonexistent/cosign", ".*", "https://issuer", Duration::from_secs(1));
        let err = verifier
            .verify(&SignatureEvidence {
                object_key: "app",
                bytes: b"x",
                digest: digest(b"x"),
                signature: b"sig",
                certificate: b"cert",
                signer_identity: "id",
            })
            .unwrap_err();
        assert!(matches!(err, SignerError::Spawn { .. }));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let signer = CosignSigner::new("/nonexistent/cosign", "id", Duration::from_secs(1));
        let err = signer
            .sign(&SigningRequest {
                object_key: "app",
                bytes: b"x",
                digest: digest(b"x"),
                identity_token: None,
            })
            .unwrap_err();
        assert!(matches!(err, SignerError::Spawn { .. }));
    }
}
