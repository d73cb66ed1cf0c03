//! Command flow against LMDB storage in a temporary directory.

use tempfile::TempDir;
use truthloop_cli::{build_checker, load_config, parse, run, Command};
use truthloop_core::{Outcome, Resolution, TruthloopConfig, VerificationMode};

fn config(dir: &TempDir) -> TruthloopConfig {
    let mut config = TruthloopConfig::defaults(dir.path().join("data"));
    config.storage.map_size_mb = 16;
    config
}

#[tokio::test]
async fn test_verify_then_feedback_creates_rule() {
    let dir = TempDir::new().unwrap();
    let checker = build_checker(&config(&dir)).unwrap();

    run(
        &checker,
        Command::Verify {
            claim: "Drinking bleach cures viral infections".to_string(),
            mode: VerificationMode::Evolving,
        },
    )
    .await
    .unwrap();
    let stats = checker.stats().unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 1);

    let case = checker
        .cases(&Default::default(), Default::default())
        .unwrap()
        .items
        .remove(0);
    run(
        &checker,
        Command::Feedback {
            case_id: case.case_id,
            ground_truth: Some(Outcome::False),
            comment: Some("Health agencies warn against this".to_string()),
        },
    )
    .await
    .unwrap();

    assert_eq!(checker.playbook_status().unwrap().version, 2);
    assert_eq!(
        checker.case(case.case_id).unwrap().unwrap().resolution,
        Resolution::Resolved
    );
    assert!(checker.audit().unwrap().is_clean());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    {
        let checker = build_checker(&config).unwrap();
        run(&checker, Command::Create { name: "experiment".to_string() })
            .await
            .unwrap();
        run(&checker, Command::Switch { name: "experiment".to_string() })
            .await
            .unwrap();
        run(
            &checker,
            Command::Verify {
                claim: "The harbour bridge reopened after repairs".to_string(),
                mode: VerificationMode::Static,
            },
        )
        .await
        .unwrap();
    }

    let checker = build_checker(&config).unwrap();
    assert_eq!(checker.stats().unwrap().total, 1);
    let mut names = checker.registry().names().unwrap();
    names.sort();
    assert_eq!(names, vec!["default".to_string(), "experiment".to_string()]);
    // The switch was recorded, so the reopened checker starts on it.
    assert_eq!(checker.registry().active_name().unwrap(), "experiment");
}

#[tokio::test]
async fn test_warmup_from_csv_file() {
    let dir = TempDir::new().unwrap();
    let dataset = dir.path().join("warmup.csv");
    std::fs::write(
        &dataset,
        "Statement;Rating;Analysis\n\
         Garlic supplements cure seasonal influenza;false;No clinical evidence\n\
         ;false;missing claim\n\
         The council approved the library budget;true;Minutes confirm the vote\n",
    )
    .unwrap();

    let checker = build_checker(&config(&dir)).unwrap();
    let command = parse(vec!["warmup".to_string(), dataset.display().to_string()])
        .unwrap()
        .command;
    run(&checker, command).await.unwrap();

    let stats = checker.stats().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.static_count, 2);
    assert!(checker.playbook_status().unwrap().version > 1);
}

#[test]
fn test_load_config_from_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("truthloop.toml");
    std::fs::write(
        &path,
        "[curator]\nreinforce_rate = 0.3\n\n[storage]\nactive_playbook = \"lab\"\n",
    )
    .unwrap();
    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.curator.reinforce_rate, 0.3);
    assert_eq!(config.storage.active_playbook, "lab");

    std::fs::write(&path, "[curator]\nreinforce_rate = 1.5\n").unwrap();
    assert!(load_config(Some(&path)).is_err());
    assert!(load_config(None).is_ok());
}
