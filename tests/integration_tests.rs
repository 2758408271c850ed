//! Integration tests for the RCon client against the mock server
//!
//! These tests run both sides over real loopback UDP.

use client::{ClientConfig, ConnectionProblem, RconClient, RconError, SessionState, ShutdownReason};
use server::{MockServer, MockServerHandle, ServerSetup};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_test::assert_ok;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn start_server(setup: ServerSetup) -> MockServerHandle {
    init_logging();
    MockServer::bind("127.0.0.1:0", setup)
        .await
        .expect("Failed to bind mock server")
        .spawn()
        .expect("Failed to start mock server")
}

fn config_for(server: &MockServerHandle, password: &str) -> ClientConfig {
    ClientConfig {
        login_timeout: Duration::from_millis(500),
        command_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(50),
        ..ClientConfig::new(server.addr.to_string(), password)
    }
}

async fn connected_client(server: &MockServerHandle) -> RconClient {
    let client = RconClient::bind(config_for(server, "password"))
        .await
        .expect("Failed to bind client");
    client.connect().await.expect("Failed to log in");
    client
}

/// LOGIN TESTS
mod login_tests {
    use super::*;

    #[tokio::test]
    async fn login_with_correct_password() {
        let server = start_server(ServerSetup {
            only_login: true,
            ..ServerSetup::default()
        })
        .await;

        let client = connected_client(&server).await;
        assert_eq!(client.state(), SessionState::Connected);

        assert_ok!(client.disconnect().await);
        assert_eq!(client.shutdown_reason(), Some(ShutdownReason::UserRequested));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_rejected() {
        let server = start_server(ServerSetup {
            only_login: true,
            ..ServerSetup::default()
        })
        .await;

        let client = RconClient::bind(config_for(&server, "fnipw93457"))
            .await
            .unwrap();
        let result = client.connect().await;

        assert!(matches!(result, Err(RconError::InvalidCredentials)));
        assert!(matches!(client.state(), SessionState::Disconnected(_)));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn login_to_silent_server_times_out_within_bound() {
        let server = start_server(ServerSetup {
            login_server_down: true,
            only_login: true,
            ..ServerSetup::default()
        })
        .await;

        let client = RconClient::bind(config_for(&server, "password"))
            .await
            .unwrap();
        let started = Instant::now();
        let result = client.connect().await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(RconError::Timeout(_))));
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
        assert_eq!(server.metrics.snapshot().logins_received, 1);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_address_is_reported() {
        init_logging();
        let config = ClientConfig::new("not an address", "password");
        let result = RconClient::bind(config).await;
        assert!(matches!(result, Err(RconError::InvalidAddress(_))));
    }
}

/// COMMAND TESTS
mod command_tests {
    use super::*;

    #[tokio::test]
    async fn single_part_response() {
        let server = start_server(ServerSetup::default()).await;
        let client = connected_client(&server).await;

        let result = client.send_command("getplayers").await.unwrap();
        assert!(result.succeeded);
        assert!(result.body.starts_with("Players on server:"));
        assert_eq!(result.body, server::network::players_listing(3));

        client.disconnect().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn multi_part_response_in_order() {
        let server = start_server(ServerSetup::default()).await;
        let client = connected_client(&server).await;

        let result = client.send_command("getplayersmulti").await.unwrap();
        assert!(result.succeeded);
        assert!(result.body.starts_with("Players on server:"));

        let mut last_position = 0;
        for part in 1..=10 {
            let marker = format!("(part {:03}/010)", part);
            let position = result.body.find(&marker).expect("part marker missing");
            assert!(position >= last_position, "{} out of order", marker);
            last_position = position;
        }

        client.disconnect().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn multi_part_response_out_of_order() {
        let server = start_server(ServerSetup {
            disordered_multi_part: true,
            ..ServerSetup::default()
        })
        .await;
        let client = connected_client(&server).await;

        let result = client.send_command("getplayersmulti").await.unwrap();
        assert!(result.succeeded);
        assert!(result.body.starts_with("Players on server:"));

        let positions: Vec<usize> = (1..=10)
            .map(|part| {
                result
                    .body
                    .find(&format!("(part {:03}/010)", part))
                    .expect("part marker missing")
            })
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

        client.disconnect().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_command() {
        let server = start_server(ServerSetup::default()).await;
        let client = connected_client(&server).await;

        let result = client.send_command("#restart").await.unwrap();
        assert!(result.succeeded);
        assert_eq!(result.body, "Unknown command");

        client.disconnect().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unanswered_command_is_soft_failure() {
        let server = start_server(ServerSetup {
            only_login: true,
            ..ServerSetup::default()
        })
        .await;
        let client = connected_client(&server).await;

        let result = client
            .send_command_with_timeout("getplayers", Duration::from_millis(200))
            .await
            .unwrap();
        assert!(!result.succeeded);
        assert!(result.body.is_empty());
        assert!(client.is_connected());

        client.disconnect().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn commands_get_distinct_sequences() {
        let server = start_server(ServerSetup::default()).await;
        let client = connected_client(&server).await;

        let first = client.send_command_raw("getplayers").await.unwrap();
        let second = client.send_command_raw("unknown").await.unwrap();
        assert_ne!(first.key(), second.key());

        assert!(first.wait(Duration::from_secs(2)).await);
        assert!(second.wait(Duration::from_secs(2)).await);
        assert_eq!(server.metrics.snapshot().commands_received, 2);

        client.disconnect().await.unwrap();
        server.stop().await.unwrap();
    }
}

/// CONSOLE MESSAGE TESTS
///
/// The load ends with the test-only shutdown signal, which the client honours
/// in debug builds.
#[cfg(debug_assertions)]
mod console_tests {
    use super::*;

    const LOAD: i32 = 100;

    async fn run_load(setup: ServerSetup, discard: bool) -> (RconClient, Vec<String>, Vec<ConnectionProblem>, MockServerHandle) {
        let server = start_server(ServerSetup {
            console_messages: LOAD,
            ..setup
        })
        .await;

        let config = ClientConfig {
            discard_console_messages: discard,
            ..config_for(&server, "password")
        };
        let mut client = RconClient::bind(config).await.unwrap();
        let mut messages = client.take_messages().unwrap();
        let mut problems = client.take_problems().unwrap();

        client.connect().await.unwrap();
        let reason = timeout(Duration::from_secs(10), client.wait_for_disconnect())
            .await
            .expect("session did not end");
        assert_eq!(reason, ShutdownReason::ServerRequested);

        let mut texts = Vec::new();
        while let Ok(message) = messages.try_recv() {
            texts.push(message.text);
        }
        let mut seen_problems = Vec::new();
        while let Ok(problem) = problems.try_recv() {
            seen_problems.push(problem);
        }
        (client, texts, seen_problems, server)
    }

    #[tokio::test]
    async fn receives_every_console_message() {
        let (client, texts, problems, server) = run_load(ServerSetup::default(), false).await;

        assert_eq!(texts.len(), LOAD as usize);
        assert_eq!(texts[0], "Console message #0");
        assert_eq!(texts[99], "Console message #99");
        assert!(problems.is_empty());
        assert_eq!(client.metrics().dispatched_console_messages, LOAD as u64);
        server.join().await.unwrap();
    }

    #[tokio::test]
    async fn repeated_console_messages_are_dispatched_once() {
        let setup = ServerSetup {
            repeated_console_messages: true,
            ..ServerSetup::default()
        };
        let (client, texts, _, server) = run_load(setup, false).await;

        assert_eq!(texts.len(), LOAD as usize);
        let metrics = client.metrics();
        assert_eq!(metrics.dispatched_console_messages, LOAD as u64);
        assert!(metrics.inbound_datagrams > LOAD as u64);
        assert!(metrics.outbound_datagrams > LOAD as u64);
        server.join().await.unwrap();
    }

    #[tokio::test]
    async fn corrupted_console_messages_are_reported() {
        let setup = ServerSetup {
            corrupt_console_messages: true,
            ..ServerSetup::default()
        };
        let (client, texts, problems, server) = run_load(setup, false).await;

        assert!(texts.is_empty());
        assert_eq!(
            problems.len() as u64,
            server.metrics.snapshot().console_messages_generated
        );
        assert!(problems.iter().all(|p| *p == ConnectionProblem::Corrupted));
        assert!(client.metrics().inbound_datagrams > LOAD as u64);
        assert_eq!(client.metrics().dispatched_console_messages, 0);
        server.join().await.unwrap();
    }

    #[tokio::test]
    async fn discarded_console_messages_are_acknowledged_only() {
        let (client, texts, _, server) = run_load(ServerSetup::default(), true).await;

        assert!(texts.is_empty());
        let metrics = client.metrics();
        assert_eq!(metrics.dispatched_console_messages, 0);
        assert!(metrics.inbound_datagrams > LOAD as u64);
        assert!(metrics.outbound_datagrams > LOAD as u64);
        server.join().await.unwrap();
    }

    #[tokio::test]
    async fn session_cannot_be_reused_after_server_shutdown() {
        let (client, _, _, server) = run_load(ServerSetup::default(), false).await;

        assert!(matches!(client.connect().await, Err(RconError::Closed)));
        assert!(matches!(
            client.send_command("getplayers").await,
            Err(RconError::Closed)
        ));
        server.join().await.unwrap();
    }
}

/// KEEP-ALIVE TESTS
mod keep_alive_tests {
    use super::*;

    fn keep_alive_config(server: &MockServerHandle) -> ClientConfig {
        ClientConfig {
            keep_alive_period: Duration::from_millis(300),
            keep_alive_grace: Duration::ZERO,
            keep_alive_interval: Duration::from_millis(100),
            keep_alive_max_tries: 5,
            poll_interval: Duration::from_millis(20),
            ..config_for(server, "password")
        }
    }

    #[tokio::test]
    async fn unanswered_keep_alives_end_session() {
        let server = start_server(ServerSetup {
            dont_answer_keep_alive: true,
            ..ServerSetup::default()
        })
        .await;
        let client = RconClient::bind(keep_alive_config(&server)).await.unwrap();
        client.connect().await.unwrap();

        let reason = timeout(Duration::from_secs(5), client.wait_for_disconnect())
            .await
            .expect("session did not expire");
        assert_eq!(reason, ShutdownReason::NoResponseFromServer);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.metrics.snapshot().keep_alives_received, 5);
        assert_eq!(client.metrics().keep_alives_sent, 5);
        assert_eq!(client.metrics().keep_alives_acknowledged, 0);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn answered_keep_alives_keep_session() {
        let server = start_server(ServerSetup::default()).await;
        let client = RconClient::bind(keep_alive_config(&server)).await.unwrap();
        client.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(client.is_connected());
        let metrics = client.metrics();
        assert!(metrics.keep_alives_sent >= 1);
        assert!(metrics.keep_alives_acknowledged >= 1);
        assert!(server.metrics.snapshot().keep_alives_received >= 1);

        client.disconnect().await.unwrap();
        server.stop().await.unwrap();
    }
}
