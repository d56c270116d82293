//! String commands: `GET`, `SET`.

use crate::database::core::Db;
use crate::database::router::CommandTable;
use crate::database::tx::{read_first_key, rollback_first_key, write_first_key};
use crate::database::{aof_line, arg_str};
use crate::protocol::RespFrame;
use crate::storage::DataEntity;
use bytes::Bytes;

pub(crate) fn get_as_string(db: &Db, key: &str) -> Result<Option<Bytes>, RespFrame> {
    match db.get_entity(key) {
        None => Ok(None),
        Some(DataEntity::Bytes(bytes)) => Ok(Some(bytes)),
        Some(_) => Err(RespFrame::wrong_type()),
    }
}

fn exec_get(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    match get_as_string(db, &key) {
        Err(reply) => reply,
        Ok(None) => RespFrame::Null,
        Ok(Some(bytes)) => RespFrame::Bulk(bytes),
    }
}

fn exec_set(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    db.put_entity(key, DataEntity::Bytes(args[1].clone()));
    db.add_aof(aof_line("SET", args));
    RespFrame::ok()
}

pub(crate) fn register(table: &mut CommandTable) {
    super::router::register(table, "get", exec_get, read_first_key, None, 2);
    super::router::register(
        table,
        "set",
        exec_set,
        write_first_key,
        Some(rollback_first_key),
        -3,
    );
}
