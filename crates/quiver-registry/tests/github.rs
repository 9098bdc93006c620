mod common;

use std::fs;

use common::{assert_integrity_format, sha256_digest, tarball};
use httpmock::prelude::*;
use quiver_config::RegistryKind;
use quiver_dl::{http_client::ClientConfig, oci::ARTIFACT_LAYER_MEDIA_TYPE};
use quiver_registry::{
    parse_artifact_id, ArtifactId, GitHubRegistry, Registry, RegistryClient, RegistryError,
    ResolvedRegistry,
};
use serde_json::json;

fn resolved(server: &MockServer, token: Option<&str>, prefix: Option<&str>) -> ResolvedRegistry {
    ResolvedRegistry {
        kind: RegistryKind::Github,
        host: server.base_url(),
        project: Some("acme".to_string()),
        token: token.map(str::to_string),
        prefix: prefix.map(str::to_string),
    }
}

fn registry(server: &MockServer) -> Registry {
    Registry::from_resolved(resolved(server, None, None), &ClientConfig::default()).unwrap()
}

fn artifact() -> ArtifactId {
    parse_artifact_id("@acme/tool").unwrap()
}

fn mock_tags(server: &MockServer, repository: &str) {
    let path = format!("/v2/{repository}/tags/list");
    server.mock(|when, then| {
        when.method(GET).path(&path);
        then.status(200).json_body(json!({
            "name": repository,
            "tags": ["1.0.0", "latest", "2.0.0", "sha-1a2b3c"]
        }));
    });
}

fn mock_artifact(server: &MockServer, repository: &str, tag: &str, layer: &[u8]) {
    let digest = sha256_digest(layer);
    let manifest_path = format!("/v2/{repository}/manifests/{tag}");
    server.mock(|when, then| {
        when.method(GET).path(&manifest_path);
        then.status(200)
            .header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
            .json_body(json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "config": {
                    "mediaType": "application/vnd.oci.empty.v1+json",
                    "digest": "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
                    "size": 2
                },
                "layers": [{
                    "mediaType": ARTIFACT_LAYER_MEDIA_TYPE,
                    "digest": digest,
                    "size": layer.len()
                }]
            }));
    });

    let blob_path = format!("/v2/{repository}/blobs/{digest}");
    server.mock(|when, then| {
        when.method(GET).path(&blob_path);
        then.status(200).body(layer);
    });
}

#[test]
fn test_versions_from_tags() {
    let server = MockServer::start();
    mock_tags(&server, "acme/tool");
    let registry = registry(&server);

    assert_eq!(registry.list_versions(&artifact()).unwrap(), vec!["2.0.0", "1.0.0"]);
    assert_eq!(
        registry.latest_version(&artifact()).unwrap().as_deref(),
        Some("2.0.0")
    );
    assert!(registry.version_exists(&artifact(), "latest").unwrap());
    assert!(!registry.version_exists(&artifact(), "3.0.0").unwrap());

    let info = registry.artifact_info(&artifact()).unwrap().unwrap();
    assert_eq!(info.versions, vec!["2.0.0", "1.0.0"]);
    assert_eq!(info.created_at, None);
}

#[test]
fn test_unknown_repository() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v2/acme/tool/tags/list");
        then.status(404);
    });
    let registry = registry(&server);

    assert!(registry.list_versions(&artifact()).unwrap().is_empty());
    assert!(registry.artifact_info(&artifact()).unwrap().is_none());

    let dir = tempfile::tempdir().unwrap();
    let err = registry
        .download(&artifact(), None, &dir.path().join("tool"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
}

#[test]
fn test_download_latest() {
    let server = MockServer::start();
    mock_tags(&server, "acme/tool");
    mock_artifact(
        &server,
        "acme/tool",
        "2.0.0",
        &tarball(&[("tool/README.md", "oci"), ("tool/bin/tool", "#!/bin/sh")]),
    );

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("tool");
    let result = registry(&server).download(&artifact(), None, &target).unwrap();

    assert_eq!(result.version, "2.0.0");
    assert_eq!(
        result.resolved,
        format!("oci://{}/acme/tool:2.0.0", server.address())
    );
    assert_integrity_format(&result.integrity);
    assert_eq!(result.file_hashes.len(), 2);
    assert_eq!(fs::read_to_string(target.join("README.md")).unwrap(), "oci");
}

#[test]
fn test_download_with_prefix() {
    let server = MockServer::start();
    mock_artifact(
        &server,
        "acme/quiver-tool",
        "1.0.0",
        &tarball(&[("tool/a.txt", "a")]),
    );
    let registry = Registry::from_resolved(
        resolved(&server, None, Some("quiver")),
        &ClientConfig::default(),
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let pinned = parse_artifact_id("@acme/tool@1.0.0").unwrap();
    let result = registry
        .download(&pinned, None, &dir.path().join("tool"))
        .unwrap();
    assert!(result.resolved.ends_with("/acme/quiver-tool:1.0.0"));
}

#[test]
fn test_download_verified_mismatch() {
    let server = MockServer::start();
    mock_artifact(&server, "acme/tool", "1.0.0", &tarball(&[("tool/a.txt", "a")]));

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("tool");
    let err = registry(&server)
        .download_verified(
            &artifact(),
            Some("1.0.0"),
            &target,
            "sha256:00000000000000000000000000000000",
        )
        .unwrap_err();

    assert!(matches!(err, RegistryError::IntegrityMismatch { .. }));
    assert!(!target.exists());
}

#[test]
fn test_publish_requires_token() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();
    let tarball_path = dir.path().join("artifact.tar.gz");
    fs::write(&tarball_path, b"x").unwrap();

    // Any executable on PATH stands in for the push tool here.
    let registry = GitHubRegistry::new(resolved(&server, None, None), &ClientConfig::default())
        .unwrap()
        .with_push_tool("sh");
    let err = registry
        .publish(&artifact(), "3.0.0", &tarball_path)
        .unwrap_err();
    assert!(matches!(err, RegistryError::AuthRequired(_)));
}

#[cfg(unix)]
mod push {
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};

    use serial_test::serial;

    use super::*;

    /// Records its arguments and stdin next to itself.
    fn fake_push_tool(dir: &Path) -> std::path::PathBuf {
        let script = dir.join("fake-oras");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" > '{0}/args'\ncat > '{0}/stdin'\n",
                dir.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[test]
    #[serial]
    fn test_publish_passes_token_on_stdin() {
        let server = MockServer::start();
        mock_tags(&server, "acme/tool");

        let dir = tempfile::tempdir().unwrap();
        let tool = fake_push_tool(dir.path());
        let tarball_path = dir.path().join("artifact.tar.gz");
        fs::write(&tarball_path, tarball(&[("tool/a.txt", "a")])).unwrap();

        let registry = GitHubRegistry::new(
            resolved(&server, Some("ghp_topsecret"), None),
            &ClientConfig::default(),
        )
        .unwrap()
        .with_push_tool(tool.to_string_lossy());

        let result = registry
            .publish(&artifact(), "3.0.0", &tarball_path)
            .unwrap();
        assert_eq!(
            result.resolved,
            format!("oci://{}/acme/tool:3.0.0", server.address())
        );

        let args = fs::read_to_string(dir.path().join("args")).unwrap();
        assert!(args.starts_with("push "), "{args}");
        assert!(args.contains("--password-stdin"));
        assert!(args.contains("--plain-http"));
        assert!(args.contains(&format!("{}/acme/tool:3.0.0", server.address())));
        assert!(args.contains(&format!("artifact.tar.gz:{ARTIFACT_LAYER_MEDIA_TYPE}")));
        assert!(!args.contains("ghp_topsecret"));

        let stdin = fs::read_to_string(dir.path().join("stdin")).unwrap();
        assert_eq!(stdin, "ghp_topsecret");
    }

    #[test]
    #[serial]
    fn test_publish_refuses_existing_version() {
        let server = MockServer::start();
        mock_tags(&server, "acme/tool");

        let dir = tempfile::tempdir().unwrap();
        let tool = fake_push_tool(dir.path());
        let tarball_path = dir.path().join("artifact.tar.gz");
        fs::write(&tarball_path, b"x").unwrap();

        let registry = GitHubRegistry::new(
            resolved(&server, Some("ghp_topsecret"), None),
            &ClientConfig::default(),
        )
        .unwrap()
        .with_push_tool(tool.to_string_lossy());

        let err = registry
            .publish(&artifact(), "2.0.0", &tarball_path)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(ref msg) if msg.contains("already exists")));
        assert!(!dir.path().join("args").exists());
    }
}
