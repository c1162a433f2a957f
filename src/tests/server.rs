//! Server assembly: module install ordering, the command entry point, and
//! chat delivery.

use std::sync::Arc;

use andesite_protocol::packets::play::ChatMessageS2c;
use andesite_server::{
    ChatMessage, Command, CommandEvent, CommandResult, Module, Server, ServerConfig,
};
use parking_lot::Mutex;

use super::{start_server, RecordingAuthenticator, TestClient};
use andesite_server_common::data::MemoryDataProvider;

struct OrderedModule {
    name: &'static str,
    priority: i32,
    log: Arc<Mutex<Vec<String>>>,
}

impl Module for OrderedModule {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn install(&self, _server: &Arc<Server>) {
        self.log.lock().push(format!("+{}", self.name));
    }

    fn uninstall(&self, _server: &Arc<Server>) {
        self.log.lock().push(format!("-{}", self.name));
    }
}

struct UptimeCommand;

impl Command for UptimeCommand {
    fn identifier(&self) -> &str {
        "uptime"
    }

    fn summary(&self) -> &str {
        "Shows how long the server has been up"
    }

    fn help(&self) -> &str {
        "/uptime"
    }

    fn execute(&self, _event: &CommandEvent) -> CommandResult {
        CommandResult::success("up and running")
    }
}

#[test]
fn modules_install_ascending_and_uninstall_descending() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let data = Arc::new(MemoryDataProvider::new());
    let auth = RecordingAuthenticator::new(false);

    let mut config = ServerConfig::new(data, auth);
    config.address = "127.0.0.1:0".parse().unwrap();
    config.modules = vec![
        Arc::new(OrderedModule {
            name: "late",
            priority: 10,
            log: log.clone(),
        }),
        Arc::new(OrderedModule {
            name: "early",
            priority: 1,
            log: log.clone(),
        }),
        Arc::new(OrderedModule {
            name: "middle",
            priority: 5,
            log: log.clone(),
        }),
    ];

    let server = Server::start(config).unwrap();
    assert_eq!(*log.lock(), ["+early", "+middle", "+late"]);

    server.shutdown();
    assert_eq!(
        *log.lock(),
        ["+early", "+middle", "+late", "-late", "-middle", "-early"]
    );
}

#[test]
fn interpret_routes_commands_and_ignores_plain_text() {
    let (server, _data, _auth) = start_server(&[], false);

    server.commands().register(Arc::new(UptimeCommand));

    assert_eq!(server.interpret("just chatting"), None);
    assert_eq!(server.interpret("/uptime"), Some("up and running".into()));
    assert_eq!(
        server.interpret("/nope"),
        Some("No such command: /nope".into())
    );
}

#[test]
fn broadcast_chat_reaches_play_clients_and_the_chat_log() {
    let (server, data, _auth) = start_server(&[], false);

    let mut client = TestClient::connect(server.local_addr());
    client.login("alice");

    let message = ChatMessage::text("the server is restarting soon")
        .from_sender("console")
        .broadcast();
    server.send_chat(&message);

    let packet: ChatMessageS2c = client.recv();
    let json: serde_json::Value = serde_json::from_str(&packet.json).unwrap();
    assert_eq!(json["extra"][0]["text"], "the server is restarting soon");

    let chat_log = data.chat_log_entries();
    assert_eq!(chat_log.len(), 1);
    assert!(chat_log[0].contains("console"));
    assert!(chat_log[0].contains("the server is restarting soon"));
}
