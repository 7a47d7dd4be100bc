#![allow(clippy::unwrap_used, clippy::wildcard_imports)]


mod flow_post;

pub fn init_logger() {
	let _ = env_logger::builder().is_test(true).try_init();
}
