//! ACME account registration tests

use acme_converge::ConvergeError;

use crate::common::{failed, ok, TestApp, EMAIL, USER};

const REGISTERED: &str = "[Mon Oct 19 12:00:00 UTC 2026] Create account key ok.\n\
                          [Mon Oct 19 12:00:00 UTC 2026] Registering account: https://acme.zerossl.com/v2/DV90\n\
                          [Mon Oct 19 12:00:00 UTC 2026] Registered\n\
                          [Mon Oct 19 12:00:00 UTC 2026] ACCOUNT_THUMBPRINT='r4nd0mThumb'\n";

#[tokio::test]
async fn test_register_account() {
    let app = TestApp::installed();
    app.runner.on("--register-account", ok(REGISTERED));

    let registration = app
        .client
        .register_account(&app.context(), Some("zerossl"))
        .await
        .unwrap();

    assert_eq!(registration.user, USER);
    assert_eq!(registration.email, EMAIL);
    assert_eq!(registration.server.as_deref(), Some("zerossl"));
    assert_eq!(registration.thumbprint.as_deref(), Some("r4nd0mThumb"));

    let cmd = &app.runner.commands_with("--register-account")[0];
    assert_eq!(cmd.arg_value("-m"), Some(EMAIL));
    assert_eq!(cmd.arg_value("--server"), Some("zerossl"));
    assert_eq!(cmd.run_as.as_ref().map(|a| a.name.as_str()), Some(USER));
}

#[tokio::test]
async fn test_register_uses_configured_server() {
    let app = TestApp::with_config(|c| c.server = Some("letsencrypt".to_string()));
    app.host.install_for(USER);

    let registration = app
        .client
        .register_account(&app.context(), None)
        .await
        .unwrap();

    assert_eq!(registration.server.as_deref(), Some("letsencrypt"));
    assert_eq!(registration.thumbprint, None);
}

#[tokio::test]
async fn test_register_failure_is_operation_error() {
    let app = TestApp::installed();
    app.runner
        .on("--register-account", failed(1, "Register account Error: rate limited"));

    let err = app
        .client
        .register_account(&app.context(), None)
        .await
        .unwrap_err();

    match err {
        ConvergeError::OperationError { operation, output } => {
            assert_eq!(operation, "register");
            assert_eq!(output.exit_code, Some(1));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_register_requires_tool() {
    let app = TestApp::new();

    let err = app
        .client
        .register_account(&app.context(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvergeError::ToolNotFound(_)));
    assert!(app.runner.commands().is_empty());
}

#[tokio::test]
async fn test_register_rejects_bad_email() {
    let app = TestApp::installed();
    let mut context = app.context();
    context.email = "not-an-email".to_string();

    let err = app
        .client
        .register_account(&context, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvergeError::InvalidSpecification(_)));
    assert!(app.runner.commands().is_empty());
}
