//! Server-level helpers: `PING` and the `AUTH` credential check.

use crate::config::ServerConfig;
use crate::connection::Session;
use crate::database::arg_str;
use crate::database::core::Db;
use crate::database::router::CommandTable;
use crate::database::tx::no_keys;
use crate::protocol::RespFrame;
use bytes::Bytes;

/// `AUTH password`: stores the submitted password on the session, then
/// checks it against the configured one.
pub fn auth(config: &ServerConfig, session: &Session, args: &[Bytes]) -> RespFrame {
    if args.len() != 1 {
        return RespFrame::arg_num_error("auth");
    }
    if config.require_pass.is_empty() {
        return RespFrame::error("ERR client sent AUTH, but no password is set");
    }

    let password = arg_str(&args[0]);
    session.set_password(&password);
    if config.require_pass != password {
        return RespFrame::error("ERR invalid password");
    }
    RespFrame::ok()
}

/// True when `session` may run commands under `config`.
pub fn is_authenticated(config: &ServerConfig, session: &Session) -> bool {
    config.require_pass.is_empty() || session.password() == config.require_pass
}

fn exec_ping(_db: &Db, args: &[Bytes]) -> RespFrame {
    match args {
        [] => RespFrame::status("PONG"),
        [message] => RespFrame::Bulk(message.clone()),
        _ => RespFrame::arg_num_error("ping"),
    }
}

pub(crate) fn register(table: &mut CommandTable) {
    super::router::register(table, "ping", exec_ping, no_keys, None, -1);
}
