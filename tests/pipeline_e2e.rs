//! End-to-end pipeline runs against in-memory collaborators.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use tempfile::TempDir;

use model_packager::builder::{BuildMonitor, ImageBuilder};
use model_packager::cloud::{ImageRegistry, RegistryCoords};
use model_packager::config::AppConfig;
use model_packager::identity::{hashed_string, HashSeed};
use model_packager::mock::{http_stub, targz_bytes, MemoryRegistry, MemoryStore, StaticConnector};
use model_packager::mock::NoopReset;
use model_packager::params::{ParamKey, ParameterSet};
use model_packager::pipeline::{Pipeline, PipelineState};

const ACCESS: &str = "AKIA";
const SECRET: &str = "secret";
const PLATFORM: &str = "sagemaker";
const MODEL_TYPE: &str = "object-detection";

struct Fixture {
    _root: TempDir,
    params: ParameterSet,
    connector: StaticConnector,
    registry: MemoryRegistry,
    config: AppConfig,
}

/// Expected truncated hash for the stock seed plus the fixture model name.
fn expected_id() -> String {
    hashed_string(&format!("{ACCESS}{SECRET}{PLATFORM}{MODEL_TYPE}yolo"), 10)
}

fn stock_seed() -> HashSeed {
    HashSeed::default_flow(ACCESS, SECRET, PLATFORM, MODEL_TYPE)
}

fn fixture_config(root: &Path) -> AppConfig {
    serde_yaml::from_str(&format!(
        "\
resource-dir: {0}/catalog
working-dir: {0}/work
importer-res-dir: importer_resources
importer-root-dir: asset_bundle
importer-model-dir: model_one
model-script-dir: container_src
builder-wait-minutes: 1
builder-timeout-minutes: 20
model-config-name: config.yaml
model-descriptor-name: model.yaml
model-weights-name: model.pt
params-dir-name: weights
other-res-dir-name: resources
",
        root.display()
    ))
    .unwrap()
}

/// Seed the boilerplate catalog, both input archives, the registry repository
/// and a full parameter set pointed at the given importer.
fn fixture(importer_host: &str, importer_port: &str) -> Fixture {
    let root = TempDir::new().unwrap();

    let model_type_dir = root.path().join("catalog").join(PLATFORM).join(MODEL_TYPE);
    fs::create_dir_all(model_type_dir.join("importer_resources")).unwrap();
    fs::write(model_type_dir.join("Dockerfile"), "FROM scratch").unwrap();
    fs::write(
        model_type_dir.join("importer_resources/config.yaml"),
        "placeholder: true",
    )
    .unwrap();

    let mut store = MemoryStore::new();
    store.add_bucket("models");
    store.put_object(
        "models",
        "in/params.tar.gz",
        targz_bytes(&[("weights.bin", "wwww")]),
    );
    store.put_object(
        "models",
        "in/resources.tar.gz",
        targz_bytes(&[
            ("model.yaml", "name: yolo\nversion: 2.0.0\n"),
            ("model.pt", "weights-blob"),
        ]),
    );

    let registry = MemoryRegistry::new();
    registry.create_repository("models").unwrap();

    let params = ParameterSet::new()
        .with(ParamKey::AccessKeyId, ACCESS)
        .with(ParamKey::SecretAccessKey, SECRET)
        .with(ParamKey::RegistryUrl, "registry.example.com")
        .with(ParamKey::RegistryRepo, "models")
        .with(ParamKey::RegistryUser, "packager")
        .with(ParamKey::ModelDir, root.path().join("catalog").to_string_lossy())
        .with(ParamKey::ParametersPath, "in/params.tar.gz")
        .with(ParamKey::ResourcesPath, "in/resources.tar.gz")
        .with(ParamKey::Bucket, "models")
        .with(ParamKey::ImporterHost, importer_host)
        .with(ParamKey::ImporterPort, importer_port)
        .with(ParamKey::Platform, PLATFORM)
        .with(ParamKey::ModelType, MODEL_TYPE);

    let config = fixture_config(root.path());
    let connector = StaticConnector::new(store, registry.clone());

    Fixture {
        _root: root,
        params,
        connector,
        registry,
        config,
    }
}

fn coords() -> RegistryCoords {
    RegistryCoords::new("registry.example.com", "models")
}

fn instant_builder() -> ImageBuilder {
    ImageBuilder::new(BuildMonitor::new(
        Duration::from_millis(10),
        Duration::from_secs(5),
    ))
    .with_program("true")
}

#[test]
fn full_run_packages_publishes_and_notifies() {
    let importer = http_stub("Importer server working - Models imported: 1");
    let (host, port) = importer.host_port();
    let fx = fixture(&host, &port);

    // The builder stub pushes nothing, so the tag is recorded up front.
    let repository = format!("models/converted-model-{}", expected_id());
    fx.registry.tag_image(&repository, "2.0.0");

    let reset = NoopReset::new();
    let mut pipeline = Pipeline::new(coords(), fx.config.clone()).unwrap();
    let response = pipeline.execute(&fx.params, &fx.connector, &instant_builder(), &reset);

    assert!(response.is_success(), "errors: {:?}", response.errors);
    let success = response.success.unwrap();
    assert_eq!(success.model_id, expected_id());
    assert_eq!(success.image_name, format!("converted-model-{}", expected_id()));
    assert_eq!(success.model_version, "2.0.0");
    assert_eq!(
        success.registry_url.as_deref(),
        Some(format!("https://registry.example.com/v2/{repository}/manifests/2.0.0").as_str())
    );
    assert_eq!(pipeline.state(), PipelineState::Notified);
    assert_eq!(reset.reset_count(), 1);
}

#[test]
fn repeated_run_with_same_inputs_is_tolerated() {
    let importer = http_stub("Importer server working - Models imported: 1");
    let (host, port) = importer.host_port();
    let fx = fixture(&host, &port);

    let repository = format!("models/converted-model-{}", expected_id());
    fx.registry.tag_image(&repository, "2.0.0");

    let mut first = Pipeline::new(coords(), fx.config.clone()).unwrap();
    let response = first.execute(&fx.params, &fx.connector, &instant_builder(), &NoopReset::new());
    assert!(response.is_success(), "errors: {:?}", response.errors);
    assert!(fx.registry.has_repository(&repository));

    // Second run targets the already-existing image repository.
    let mut second = Pipeline::new(coords(), fx.config.clone()).unwrap();
    let response = second.execute(&fx.params, &fx.connector, &instant_builder(), &NoopReset::new());
    assert!(response.is_success(), "errors: {:?}", response.errors);
}

#[test]
fn bundle_carries_generated_descriptor_and_versioned_weights() {
    let importer = http_stub("Importer server working - ok");
    let (host, port) = importer.host_port();
    let fx = fixture(&host, &port);

    let mut pipeline = Pipeline::new(coords(), fx.config.clone()).unwrap();
    let assets = pipeline.validate_and_verify(&fx.params, &fx.connector).unwrap();
    let bundle = pipeline
        .process_model_archives(
            &assets.params_dir,
            &assets.resources_dir,
            &assets.model_type_dir,
            &stock_seed(),
        )
        .unwrap();
    assert_eq!(pipeline.state(), PipelineState::Assembled);

    let out = TempDir::new().unwrap();
    let mut archive = tar::Archive::new(GzDecoder::new(&bundle[..]));
    archive.unpack(out.path()).unwrap();

    let model_dir: PathBuf = out
        .path()
        .join("importer_resources/asset_bundle/model_one");
    assert!(model_dir.join("2.0.0/model.pt").is_file());

    let descriptor: serde_yaml::Value =
        serde_yaml::from_str(&fs::read_to_string(model_dir.join("config.yaml")).unwrap()).unwrap();
    assert_eq!(descriptor["id"].as_str(), Some(expected_id().as_str()));
    assert_eq!(descriptor["lastVersion"].as_str(), Some("2.0.0"));
    assert_eq!(
        descriptor["dockerRepository"]["host"].as_str(),
        Some("registry.example.com")
    );
    assert_eq!(descriptor["dockerRepository"]["prefix"].as_str(), Some("models"));
}

#[test]
fn silent_importer_fails_verification_before_any_processing() {
    let importer = http_stub("hello, not the marker you expect");
    let (host, port) = importer.host_port();
    let fx = fixture(&host, &port);

    // Driven through the default-flow entry; the configured builder is never
    // reached because verification fails first.
    let mut pipeline = Pipeline::new(coords(), fx.config.clone()).unwrap();
    let response = pipeline.run(&fx.params, &fx.connector, &NoopReset::new());

    assert!(!response.is_success());
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].code.as_str(), "403");
    assert_eq!(pipeline.state(), PipelineState::Failed);
    // Nothing was assembled, published or notified.
    assert!(pipeline.identity().is_none());
}

#[test]
fn zero_imported_response_fails_the_run_after_publish() {
    let importer = http_stub("Importer server working - Models imported: 0");
    let (host, port) = importer.host_port();
    let fx = fixture(&host, &port);

    let repository = format!("models/converted-model-{}", expected_id());
    fx.registry.tag_image(&repository, "2.0.0");

    let reset = NoopReset::new();
    let mut pipeline = Pipeline::new(coords(), fx.config.clone()).unwrap();
    let response = pipeline.execute(&fx.params, &fx.connector, &instant_builder(), &reset);

    assert!(!response.is_success());
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].code.as_str(), "504");
    assert_eq!(pipeline.state(), PipelineState::Failed);
    // Publish completed, so the environment reset still ran.
    assert_eq!(reset.reset_count(), 1);
}

#[test]
fn missing_parameters_fail_validation_with_full_list() {
    let importer = http_stub("Importer server working - ok");
    let (host, port) = importer.host_port();
    let mut fx = fixture(&host, &port);
    fx.params = ParameterSet::new().with(ParamKey::Bucket, "models");

    let mut pipeline = Pipeline::new(coords(), fx.config.clone()).unwrap();
    let response = pipeline.execute(&fx.params, &fx.connector, &instant_builder(), &NoopReset::new());

    assert!(!response.is_success());
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].code.as_str(), "400");
    // One aggregated entry names every missing aspect.
    assert!(response.errors[0].message.contains("AWS_ACCESS_KEY_ID"));
    assert!(response.errors[0].message.contains("MP_IMPORTER_HOST"));
}

#[test]
fn builder_timeout_is_reported_and_reset_still_runs() {
    let importer = http_stub("Importer server working - Models imported: 1");
    let (host, port) = importer.host_port();
    let fx = fixture(&host, &port);

    // Stub builder that outlives the monitor's ceiling.
    let script = fx._root.path().join("slow-builder.sh");
    fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    }

    let builder = ImageBuilder::new(BuildMonitor::new(
        Duration::from_millis(10),
        Duration::from_millis(200),
    ))
    .with_program(&script);

    let reset = NoopReset::new();
    let mut pipeline = Pipeline::new(coords(), fx.config.clone()).unwrap();
    let response = pipeline.execute(&fx.params, &fx.connector, &builder, &reset);

    assert!(!response.is_success());
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].code.as_str(), "500");
    // The message reports the monitor's ceiling, not the settings file's.
    assert!(response.errors[0].message.contains("200ms"), "{}", response.errors[0].message);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(reset.reset_count(), 1);
}
