//! Roundtrip serialisation tests for `harbor-core` config documents.
//!
//! Each `#[case]` is isolated and shares no state.

use harbor_core::{
    config::{HarborConfig, SupervisorKind},
    AppSpec, RouteSpec,
};
use rstest::rstest;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn minimal_config() -> HarborConfig {
    HarborConfig::default()
}

fn full_config() -> HarborConfig {
    let mut config = HarborConfig::default();
    config.defaults.default_branch = Some("release".to_string());
    config.defaults.default_port = Some(8080);
    config.defaults.target_folder = Some(PathBuf::from("/srv/harbor/apps"));
    config.source.token = Some("ghp_example".to_string());
    config.supervisor.kind = SupervisorKind::Pm2;
    config.install.enabled = false;
    config.peers = vec![PathBuf::from("/run/harbor/peer-b.sock")];
    config.apps = vec![
        AppSpec::new("svc-a", "acme/svc-a", "/svc-a"),
        AppSpec::new(
            "mono-api",
            "acme/mono/services/api",
            vec!["/api".to_string(), "/v2/api".to_string()],
        )
        .with_branch("develop")
        .with_port(4200)
        .with_target_folder("/srv/other"),
    ];
    config
}

fn unicode_config() -> HarborConfig {
    let mut config = HarborConfig::default();
    config.apps = vec![AppSpec::new("アプリ-проект", "acme/项目", RouteSpec::from("/ü"))];
    config
}

// ---------------------------------------------------------------------------
// Parameterised roundtrip
// ---------------------------------------------------------------------------

#[rstest]
#[case::minimal(minimal_config())]
#[case::full(full_config())]
#[case::unicode(unicode_config())]
fn yaml_roundtrip(#[case] config: HarborConfig) {
    let yaml = serde_yaml::to_string(&config).expect("serialize");
    let back: HarborConfig = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(config, back);
}

#[rstest]
#[case::single("route: /svc-a", vec!["/svc-a"])]
#[case::list("route: [/a, /b]", vec!["/a", "/b"])]
#[case::missing("{}", vec![])]
#[case::blank("route: ''", vec![])]
fn route_forms(#[case] yaml: &str, #[case] expected: Vec<&str>) {
    let spec: AppSpec = serde_yaml::from_str(yaml).expect("parse");
    assert_eq!(spec.route.routes(), expected);
}
