//! SBOM and provenance documents attached to a signed artifact.
//!
//! Both are generic: the SBOM names the package without enumerating its
//! contents, and the provenance records the builder and the package digest.

use chrono::{DateTime, SecondsFormat, Utc};
use salsag_ledger::Digest;
use serde::Serialize;

pub const SPDX_VERSION: &str = "SPDX-2.3";
pub const SLSA_PREDICATE_TYPE: &str = "https://slsa.dev/provenance/v0.2";
pub const DOCUMENT_NAMESPACE_BASE: &str = "https://salsag.example.com";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpdxDocument {
    pub spdx_version: String,
    pub data_license: String,
    #[serde(rename = "SPDXID")]
    pub spdx_id: String,
    pub name: String,
    pub document_namespace: String,
    pub creation_info: CreationInfo,
    pub packages: Vec<SpdxPackage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreationInfo {
    pub created: String,
    pub creators: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpdxPackage {
    #[serde(rename = "SPDXID")]
    pub spdx_id: String,
    pub name: String,
    pub download_location: String,
    pub files_analyzed: bool,
    pub copyright_text: String,
    pub checksums: Vec<SpdxChecksum>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpdxChecksum {
    pub algorithm: String,
    pub checksum_value: String,
}

/// Minimal SPDX document describing one package.
pub fn sbom(object_key: &str, digest: &Digest, created: DateTime<Utc>) -> SpdxDocument {
    SpdxDocument {
        spdx_version: SPDX_VERSION.to_string(),
        data_license: "CC0-1.0".to_string(),
        spdx_id: "SPDXRef-DOCUMENT".to_string(),
        name: format!("SBOM for {}", object_key),
        document_namespace: format!("{}/{}/{}", DOCUMENT_NAMESPACE_BASE, object_key, digest.to_hex()),
        creation_info: CreationInfo {
            created: created.to_rfc3339_opts(SecondsFormat::Secs, true),
            creators: vec![format!("Tool: salsag-{}", env!("CARGO_PKG_VERSION"))],
        },
        packages: vec![SpdxPackage {
            spdx_id: "SPDXRef-Package".to_string(),
            name: object_key.to_string(),
            download_location: "NOASSERTION".to_string(),
            files_analyzed: false,
            copyright_text: "NOASSERTION".to_string(),
            checksums: vec![SpdxChecksum {
                algorithm: "SHA256".to_string(),
                checksum_value: digest.to_hex(),
            }],
        }],
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(rename = "_type")]
    pub statement_type: String,
    pub predicate_type: String,
    pub subject: Vec<Subject>,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subject {
    pub name: String,
    pub digest: SubjectDigest,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectDigest {
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub builder: Builder,
    pub build_type: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct Builder {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub build_started_on: String,
    pub completeness: Completeness,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completeness {
    pub parameters: bool,
    pub environment: bool,
    pub materials: bool,
}

/// SLSA provenance statement for one packaged artifact.
pub fn provenance(object_key: &str, digest: &Digest, builder_id: &str, started: DateTime<Utc>) -> Provenance {
    Provenance {
        statement_type: "https://in-toto.io/Statement/v0.1".to_string(),
        predicate_type: SLSA_PREDICATE_TYPE.to_string(),
        subject: vec![Subject {
            name: object_key.to_string(),
            digest: SubjectDigest { sha256: digest.to_hex() },
        }],
        predicate: Predicate {
            builder: Builder {
                id: builder_id.to_string(),
            },
            build_type: builder_id.to_string(),
            metadata: Metadata {
                build_started_on: started.to_rfc3339_opts(SecondsFormat::Secs, true),
                completeness: Completeness {
                    parameters: true,
                    environment: false,
                    materials: false,
                },
            },
        },
    }
}

/// Pretty JSON bytes for upload.
pub fn to_bytes<T: Serialize>(document: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use salsag_ledger::digest;

    #[test]
    fn test_sbom_shape() {
        let d = digest(b"pkg");
        let doc = serde_json::to_value(sbom("app-v1.tar", &d, Utc::now())).unwrap();
        assert_eq!(doc["spdxVersion"], "SPDX-2.3");
        assert_eq!(doc["SPDXID"], "SPDXRef-DOCUMENT");
        assert_eq!(doc["packages"][0]["name"], "app-v1.tar");
        assert_eq!(doc["packages"][0]["checksums"][0]["checksumValue"], d.to_hex());
        assert_eq!(doc["packages"][0]["filesAnalyzed"], false);
    }

    #[test]
    fn test_provenance_subject_digest() {
        let d = digest(b"pkg");
        let doc = serde_json::to_value(provenance("app-v1.tar", &d, "https://ci.example", Utc::now())).unwrap();
        assert_eq!(doc["_type"], "https://in-toto.io/Statement/v0.1");
        assert_eq!(doc["subject"][0]["digest"]["sha256"], d.to_hex());
        assert_eq!(doc["predicate"]["builder"]["id"], "https://ci.example");
        assert_eq!(doc["predicate"]["metadata"]["completeness"]["environment"], false);
    }
}
