//! Checks AzamPay configuration without starting the server.
//!
//! Exit codes: 0 healthy, 1 credentials missing, 2 vendor account not
//! resolvable, 3 token acquisition failed.

use makazi_payments::logging::init_tracing_from_env;
use makazi_payments::payments::providers::AzamPayTokenSource;
use makazi_payments::payments::ProviderEnv;
use makazi_payments::services::diagnostic::run_diagnostics;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing_from_env();

    let env = ProviderEnv::from_env();
    let source = match AzamPayTokenSource::new() {
        Ok(source) => source,
        Err(e) => {
            eprintln!("failed to build HTTP client: {}", e);
            std::process::exit(3);
        }
    };

    let report = run_diagnostics(&env, &source).await;
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(_) => println!("{}", report.summary),
    }
    std::process::exit(report.exit_code());
}
