#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let s = String::from_utf8_lossy(data);

    for event in pinata_mcp::decode_sse_events(&s) {
        let _ = serde_json::from_str::<pinata_mcp::JsonRpcMessage>(&event.data);
    }
    let _ = pinata_mcp::parse_first_json_message_from_sse(&s);

    // Anything that decodes must survive a re-encode as an SSE event.
    if let Ok(pinata_mcp::JsonRpcMessage::Response(resp)) =
        serde_json::from_str::<pinata_mcp::JsonRpcMessage>(&s)
    {
        let event = pinata_mcp::encode_sse_event(&resp);
        assert_eq!(pinata_mcp::decode_sse_events(&event).len(), 1);
    }
});
