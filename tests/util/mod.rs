// Not every scenario test uses every helper here.
#![allow(dead_code)]

use std::sync::Once;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}
