#![no_main]

use courier::Envelope;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    // Доставка с произвольными байтами: разбор не должен паниковать
    let Ok(envelope) = Envelope::<Value>::decode(data) else {
        return;
    };

    // Успешно разобранный конверт кодируется и читается обратно без потерь
    let encoded = envelope.encode().expect("decoded envelope must encode");
    let again = Envelope::<Value>::decode(&encoded).expect("re-encoded envelope must decode");
    assert_eq!(again.message(), envelope.message());
    assert_eq!(again.message_id(), envelope.message_id());
    assert_eq!(again.correlation_id(), envelope.correlation_id());
});
