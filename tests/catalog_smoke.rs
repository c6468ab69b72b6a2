use vswr_core::{evaluate_vswr_range, ConfigKey, ParameterCatalog, ScanResult, Verdict};

#[test]
fn builtin_catalog_covers_mandatory_configurations() {
    let catalog = ParameterCatalog::builtin().unwrap();

    for key in ConfigKey::mandatory() {
        let params = catalog.resolve(key).unwrap();
        assert!(params.start_khz <= params.vswr_start_khz, "{key}");
        assert!(params.vswr_stop_khz <= params.stop_khz, "{key}");
        assert!(params.vswr_start_khz <= params.vswr_mid_khz && params.vswr_mid_khz <= params.vswr_stop_khz);
        assert!(params.vswr_max > 1.0, "{key}");
        assert!(params.point_count() > 1, "{key}");
    }
}

#[test]
fn keys_parse_from_catalog_labels() {
    let key: ConfigKey = "E-Sq-Final".parse().unwrap();
    assert_eq!(key.to_string(), "E-Sq-Final");
    assert!("E-Tri-Final".parse::<ConfigKey>().is_err());
}

#[test]
fn limit_is_inclusive() {
    let result = ScanResult::from_pairs(&[(1_000, 1.2), (1_100, 1.5), (1_200, 1.3)]).unwrap();
    assert_eq!(evaluate_vswr_range(&result, 1_000, 1_200, 1.5).verdict, Verdict::Pass);
    assert_eq!(evaluate_vswr_range(&result, 1_000, 1_200, 1.49).verdict, Verdict::Fail);
    assert_eq!(evaluate_vswr_range(&result, 2_000, 3_000, 1.5).verdict, Verdict::EmptyWindow);
}
