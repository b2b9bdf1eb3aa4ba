#![no_main]

use ferrous_blueprint::{Blueprint, Container};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(blueprint) = Blueprint::from_json(text) else {
        return;
    };
    // a container must either fail cleanly or come up and go down
    if let Ok(container) = Container::builder()
        .name("fuzz")
        .source(blueprint)
        .grace_period(false)
        .publish_container(false)
        .build()
    {
        if container.start().is_ok() {
            let _ = container.await_active(std::time::Duration::from_millis(50));
        }
        container.destroy();
    }
});
