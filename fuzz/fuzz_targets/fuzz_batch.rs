#![no_main]

use libfuzzer_sys::fuzz_target;
use raknet_relay::core::cursor::Cursor;
use raknet_relay::protocol::login::read_login_chain;
use raknet_relay::utils::compression::inflate;

fuzz_target!(|data: &[u8]| {
    // Inflate and login parsing must fail cleanly on arbitrary input
    let _ = inflate(data, 1 << 20);
    let _ = read_login_chain(data);
    let mut c = Cursor::new(data);
    while c.read_var_u128().is_ok() {}
});
