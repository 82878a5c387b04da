use mcp_agent_bridge::config::AppConfig;
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("MCP_AGENT__MCP__CONFIG_PATH");
        env::remove_var("MCP_AGENT__MCP__CALL_TIMEOUT_SECS");
        env::remove_var("MCP_AGENT__LOGGING__FILTER");
        env::remove_var("MCP_CONFIG_PATH");
        env::remove_var("CONFIG_FILE");
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args(["mcp-agent"]).expect("defaults should load");
    assert_eq!(config.mcp.config_path, "mcp_config.json");
    assert_eq!(config.mcp.discovery_timeout_secs, 30);
    assert_eq!(config.mcp.call_timeout_secs, 60);
    assert_eq!(config.logging.filter, "info");
    assert!(!config.logging.json);

    let options = config.client_options();
    assert_eq!(options.shutdown_grace, Duration::from_millis(2000));
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("MCP_AGENT__MCP__CALL_TIMEOUT_SECS", "5");
        env::set_var("MCP_AGENT__LOGGING__FILTER", "debug");
    }

    let config = AppConfig::load_from_args(["mcp-agent"]).expect("Failed to load config");
    assert_eq!(config.mcp.call_timeout_secs, 5);
    assert_eq!(config.logging.filter, "debug");
    assert_eq!(config.client_options().call_timeout, Duration::from_secs(5));

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("agent.yaml");
    fs::write(
        &file_path,
        "mcp:\n  config_path: servers.json\n  discovery_timeout_secs: 3\n",
    )
    .expect("Failed to write temp config");

    unsafe {
        env::set_var("CONFIG_FILE", &file_path);
    }

    let config = AppConfig::load_from_args(["mcp-agent"]).expect("Failed to load config from file");
    assert_eq!(config.mcp.config_path, "servers.json");
    assert_eq!(config.mcp.discovery_timeout_secs, 3);
    assert_eq!(config.mcp.call_timeout_secs, 60);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_overrides_env() {
    clear_env_vars();
    unsafe {
        env::set_var("MCP_AGENT__MCP__CONFIG_PATH", "from-env.json");
    }

    let config = AppConfig::load_from_args([
        "mcp-agent",
        "--mcp-config",
        "from-cli.json",
        "--call-timeout",
        "7",
        "--log-json",
    ])
    .expect("Failed to load config");
    assert_eq!(config.mcp.config_path, "from-cli.json");
    assert_eq!(config.mcp.call_timeout_secs, 7);
    assert!(config.logging.json);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_fails() {
    clear_env_vars();

    let result = AppConfig::load_from_args(["mcp-agent", "--config", "/no/such/agent.yaml"]);
    assert!(result.is_err());
}
