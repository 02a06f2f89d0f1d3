//! Certificate convergence tests against the acme.sh client

use chrono::Duration;

use acme_converge::models::{
    ActionTaken, CertificateAction, KeyAlgorithm, Outcome, ValidityWindow,
};
use acme_converge::ConvergeError;

use crate::common::{
    alpn_spec, dns_spec, failed, info_issued, info_not_issued, issue_already_valid,
    issue_needs_registration, issue_verify_error, now, standalone_spec, webroot_spec, TestApp,
    USER,
};

// ============================================================================
// Issue
// ============================================================================

#[tokio::test]
async fn test_fresh_issue_deploys_to_cert_path() {
    let app = TestApp::installed();
    let spec = webroot_spec(&app.cert_path());

    let result = app.converge(&spec, false).await.unwrap();

    assert_eq!(result.action_taken, ActionTaken::Issued);
    assert!(result.changed);
    assert_eq!(result.result, Outcome::Success);

    let dir = app.cert_path().join("webroot.gn98.de");
    let detail = result.detail.unwrap();
    assert_eq!(
        detail["certificate"],
        dir.join("webroot.gn98.de.cer").to_string_lossy().to_string()
    );
    assert_eq!(
        detail["private_key"],
        dir.join("webroot.gn98.de.key").to_string_lossy().to_string()
    );
    assert_eq!(
        detail["fullchain"],
        dir.join("fullchain.cer").to_string_lossy().to_string()
    );
    assert_eq!(detail["ca"], dir.join("ca.cer").to_string_lossy().to_string());

    // Missing cert path means no status query at all
    assert_eq!(app.runner.actions(), vec!["--issue"]);
    assert!(dir.is_dir());

    let issue = &app.runner.commands_with("--issue")[0];
    let binary = app.host.home(USER).join(".acme.sh").join("acme.sh");
    assert_eq!(issue.program(), binary.to_string_lossy());
    assert_eq!(issue.run_as.as_ref().map(|a| a.name.as_str()), Some(USER));
    assert_eq!(issue.arg_value("-d"), Some("webroot.gn98.de"));
    assert_eq!(issue.arg_value("--keylength"), Some("ec-256"));
    assert_eq!(issue.arg_value("-w"), Some("/var/www/html"));
    let cert_file = dir.join("webroot.gn98.de.cer").to_string_lossy().to_string();
    let fullchain_file = dir.join("fullchain.cer").to_string_lossy().to_string();
    assert_eq!(issue.arg_value("--cert-file"), Some(cert_file.as_str()));
    assert_eq!(issue.arg_value("--fullchain-file"), Some(fullchain_file.as_str()));
    assert!(!issue.has_arg("--force"));
    assert!(!issue.has_arg("--server"));
}

#[tokio::test]
async fn test_standalone_modes() {
    let app = TestApp::installed();

    app.converge(&standalone_spec(&app.cert_path()), false)
        .await
        .unwrap();
    app.converge(&alpn_spec(&app.cert_path()), false)
        .await
        .unwrap();

    let issues = app.runner.commands_with("--issue");
    assert_eq!(issues.len(), 2);
    assert!(issues[0].has_arg("--standalone"));
    assert_eq!(issues[0].arg_value("--httpport"), Some("8080"));
    assert!(issues[1].has_arg("--alpn"));
    assert!(!issues[1].has_arg("--tlsport"));
}

#[tokio::test]
async fn test_dns_credentials_only_in_environment() {
    let app = TestApp::installed();
    let spec = dns_spec(&app.cert_path());

    let result = app.converge(&spec, false).await.unwrap();
    assert_eq!(result.action_taken, ActionTaken::Issued);

    let issue = &app.runner.commands_with("--issue")[0];
    assert_eq!(issue.arg_value("--dns"), Some("dns_cf"));
    assert!(issue.argv.iter().any(|a| a == "*.dns.gn98.de"));
    assert!(!issue.argv.iter().any(|a| a.contains("s3cr3t")));
    assert_eq!(
        issue.env_overrides.get("CF_Token").map(String::as_str),
        Some("s3cr3t")
    );
    assert_eq!(
        issue.env_overrides.get("CF_Account_ID").map(String::as_str),
        Some("1234")
    );
}

#[tokio::test]
async fn test_key_algorithm_server_and_validity_window() {
    let app = TestApp::with_config(|c| c.server = Some("letsencrypt".to_string()));
    app.host.install_for(USER);

    let mut spec = webroot_spec(&app.cert_path());
    spec.key_algorithm = KeyAlgorithm::Rsa4096;
    spec.validity_window = Some(ValidityWindow {
        not_before: now(),
        not_after: now() + Duration::days(7),
    });

    app.converge(&spec, false).await.unwrap();

    let issue = &app.runner.commands_with("--issue")[0];
    assert_eq!(issue.arg_value("--keylength"), Some("4096"));
    assert_eq!(issue.arg_value("--server"), Some("letsencrypt"));
    assert_eq!(issue.arg_value("--valid-from"), Some("2026-10-19T12:00:00Z"));
    assert_eq!(issue.arg_value("--valid-to"), Some("2026-10-26T12:00:00Z"));

    // A per-certificate server wins over the configured default
    spec.server = Some("zerossl".to_string());
    app.converge(&spec, false).await.unwrap();
    let issue = &app.runner.commands_with("--issue")[1];
    assert_eq!(issue.arg_value("--server"), Some("zerossl"));
}

#[tokio::test]
async fn test_unknown_domain_is_issued() {
    let app = TestApp::installed();
    let spec = webroot_spec(&app.cert_path());
    app.host.deploy_certificate(&app.cert_path(), &spec.common_name);
    app.runner.on("--info", info_not_issued(&spec.common_name));

    let result = app.converge(&spec, false).await.unwrap();

    assert_eq!(result.action_taken, ActionTaken::Issued);
    assert_eq!(app.runner.actions(), vec!["--info", "--issue"]);
}

// ============================================================================
// Decision against existing certificates
// ============================================================================

#[tokio::test]
async fn test_not_due_is_up_to_date() {
    let app = TestApp::installed();
    let spec = webroot_spec(&app.cert_path());
    app.host.deploy_certificate(&app.cert_path(), &spec.common_name);
    app.runner
        .on("--info", info_issued(&spec.common_name, now() + Duration::days(30)));

    let result = app.converge(&spec, false).await.unwrap();

    assert_eq!(result.action_taken, ActionTaken::None);
    assert!(!result.changed);
    assert_eq!(
        result.message,
        "Certificate for webroot.gn98.de is already up-to-date"
    );
    assert_eq!(app.runner.actions(), vec!["--info"]);
}

#[tokio::test]
async fn test_renewal_time_equal_to_now_is_not_due() {
    let app = TestApp::installed();
    let spec = webroot_spec(&app.cert_path());
    app.host.deploy_certificate(&app.cert_path(), &spec.common_name);
    app.runner.on("--info", info_issued(&spec.common_name, now()));

    let result = app.converge(&spec, false).await.unwrap();
    assert_eq!(result.action_taken, ActionTaken::None);
}

#[tokio::test]
async fn test_due_certificate_is_renewed() {
    let app = TestApp::installed();
    let spec = webroot_spec(&app.cert_path());
    app.host.deploy_certificate(&app.cert_path(), &spec.common_name);
    app.runner
        .on("--info", info_issued(&spec.common_name, now() - Duration::seconds(1)));

    let result = app.converge(&spec, false).await.unwrap();

    assert_eq!(result.action_taken, ActionTaken::Renewed);
    assert!(result.changed);
    assert_eq!(app.runner.actions(), vec!["--info", "--renew"]);

    let renew = &app.runner.commands_with("--renew")[0];
    assert_eq!(renew.arg_value("-d"), Some("webroot.gn98.de"));
    assert!(!renew.has_arg("--force"));
}

#[tokio::test]
async fn test_force_reissues_valid_certificate() {
    let app = TestApp::installed();
    let mut spec = webroot_spec(&app.cert_path());
    spec.force = true;
    app.host.deploy_certificate(&app.cert_path(), &spec.common_name);
    app.runner
        .on("--info", info_issued(&spec.common_name, now() + Duration::days(30)));

    let result = app.converge(&spec, false).await.unwrap();

    assert_eq!(result.action_taken, ActionTaken::Issued);
    assert_eq!(app.runner.actions(), vec!["--info", "--issue"]);
    assert!(app.runner.commands_with("--issue")[0].has_arg("--force"));
}

// ============================================================================
// Recognised conditions and failures
// ============================================================================

#[tokio::test]
async fn test_already_valid_is_informational() {
    let app = TestApp::installed();
    app.runner.on("--issue", issue_already_valid());

    let result = app
        .converge(&webroot_spec(&app.cert_path()), false)
        .await
        .unwrap();

    assert_eq!(result.result, Outcome::Success);
    assert_eq!(result.action_taken, ActionTaken::None);
    assert!(!result.changed);
    assert!(result.message.contains("force=True"));
    assert!(result.message.contains("2030-01-01"));
}

#[tokio::test]
async fn test_registration_required_is_informational() {
    let app = TestApp::installed();
    app.runner.on("--issue", issue_needs_registration());

    let result = app
        .converge(&webroot_spec(&app.cert_path()), false)
        .await
        .unwrap();

    assert_eq!(result.result, Outcome::Success);
    assert!(result.message.contains("register action"));
    assert_eq!(result.detail.unwrap()["kind"], "registration_required");
}

#[tokio::test]
async fn test_renewal_not_due_marker() {
    let app = TestApp::installed();
    let spec = webroot_spec(&app.cert_path());
    app.host.deploy_certificate(&app.cert_path(), &spec.common_name);
    app.runner
        .on("--info", info_issued(&spec.common_name, now() - Duration::hours(1)));
    app.runner.on(
        "--renew",
        failed(2, "Skip, Next renewal time is: 2026-12-17T10:00:00Z"),
    );

    let result = app.converge(&spec, false).await.unwrap();

    assert_eq!(result.result, Outcome::Success);
    assert_eq!(
        result.message,
        "Next renewal time for webroot.gn98.de is 2026-12-17T10:00:00Z"
    );
}

#[tokio::test]
async fn test_unrecognised_failure_passes_output_through() {
    let app = TestApp::installed();
    let output = issue_verify_error("webroot.gn98.de");
    app.runner.on("--issue", output.clone());

    let result = app
        .converge(&webroot_spec(&app.cert_path()), false)
        .await
        .unwrap();

    assert!(result.is_failure());
    assert_eq!(result.action_taken, ActionTaken::Failed);
    let detail = result.detail.unwrap();
    assert_eq!(detail["exit_code"], 1);
    assert_eq!(detail["stdout"], output.stdout);
    assert_eq!(detail["stderr"], output.stderr);

    // No retry and no fallback to another mode
    assert_eq!(app.runner.actions(), vec!["--issue"]);
}

#[tokio::test]
async fn test_info_failure_stops_before_issue() {
    let app = TestApp::installed();
    let spec = webroot_spec(&app.cert_path());
    app.host.deploy_certificate(&app.cert_path(), &spec.common_name);
    app.runner.on("--info", failed(1, "Cannot read domain conf"));

    let result = app.converge(&spec, false).await.unwrap();

    assert!(result.is_failure());
    assert_eq!(result.message, "acme.sh info failed with exit code 1");
    assert_eq!(app.runner.actions(), vec!["--info"]);
}

#[tokio::test]
async fn test_spawn_failure_propagates() {
    let app = TestApp::installed();
    app.runner.set_spawn_error(std::io::ErrorKind::PermissionDenied);

    let err = app
        .converge(&webroot_spec(&app.cert_path()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvergeError::Io(_)));
}

// ============================================================================
// Preconditions and dry-run
// ============================================================================

#[tokio::test]
async fn test_invalid_dns_spec_runs_nothing() {
    let app = TestApp::installed();
    let mut spec = dns_spec(&app.cert_path());
    spec.dns_credentials.clear();

    let err = app.converge(&spec, false).await.unwrap_err();
    assert!(matches!(err, ConvergeError::InvalidSpecification(_)));
    assert!(app.runner.commands().is_empty());
    assert!(!app.cert_path().exists());
}

#[tokio::test]
async fn test_missing_tool_is_tool_not_found() {
    let app = TestApp::new();

    let err = app
        .converge(&webroot_spec(&app.cert_path()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvergeError::ToolNotFound(_)));
    assert!(err.to_string().contains("run the install action first"));
    assert!(app.runner.commands().is_empty());
}

#[tokio::test]
async fn test_dry_run_fresh_issue_runs_nothing() {
    let app = TestApp::installed();
    let spec = webroot_spec(&app.cert_path());

    let result = app.converge(&spec, true).await.unwrap();

    assert_eq!(result.result, Outcome::Indeterminate);
    assert_eq!(result.pending, Some(CertificateAction::Issue));
    assert!(app.runner.commands().is_empty());
    assert!(!app.cert_path().join(&spec.common_name).exists());
}

#[tokio::test]
async fn test_dry_run_renewal_only_queries_status() {
    let app = TestApp::installed();
    let spec = webroot_spec(&app.cert_path());
    app.host.deploy_certificate(&app.cert_path(), &spec.common_name);
    app.runner
        .on("--info", info_issued(&spec.common_name, now() - Duration::days(1)));

    let result = app.converge(&spec, true).await.unwrap();

    assert_eq!(result.result, Outcome::Indeterminate);
    assert_eq!(result.pending, Some(CertificateAction::Renew));
    assert_eq!(
        result.message,
        "Certificate for webroot.gn98.de would be renewed"
    );
    assert_eq!(app.runner.actions(), vec!["--info"]);
}
