#![no_main]

use jobwatch_client::parse_push_message;
use libfuzzer_sys::fuzz_target;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data).into_owned();
    let from_text = parse_push_message(WsMessage::Text(text.into()));
    let from_binary = parse_push_message(WsMessage::Binary(data.to_vec().into()));

    if let Ok(Some(event)) = from_binary {
        assert!(!event.kind().is_empty());
        if std::str::from_utf8(data).is_ok() {
            assert_eq!(from_text.ok().flatten(), Some(event));
        }
    }
});
