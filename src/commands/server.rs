//! Server Commands
//!
//! Connection and housekeeping commands that do not operate on a key.

use super::{CommandTable, Context};
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info};

pub(crate) fn register(table: &mut CommandTable) {
    table.add("ping", -1, ping);
    table.add("echo", 2, echo);
    table.add("auth", 2, auth);
    table.add("save", 1, save);
    table.add("bgsave", 1, bgsave);
    table.add("info", -1, info_cmd);
    table.add("command", -1, command);
}

/// PING [message]
fn ping(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    match ctx.args {
        [] => Ok(Reply::pong()),
        [message] => Ok(Reply::bulk(message.clone())),
        _ => Err(ctx.wrong_arity()),
    }
}

/// ECHO message
fn echo(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    Ok(Reply::bulk(ctx.arg(0).clone()))
}

/// AUTH password
fn auth(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    if !ctx.server.check_password(ctx.arg(0)) {
        return Err(CommandError::InvalidPassword);
    }
    ctx.session.set_authenticated(true);
    Ok(Reply::ok())
}

// ========================================================================
// Persistence
// ========================================================================

/// SAVE
fn save(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    ctx.store().sync()?;
    info!("DB saved on disk");
    Ok(Reply::ok())
}

/// BGSAVE
fn bgsave(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let store = Arc::clone(&ctx.db.store);
    std::thread::spawn(move || match store.sync() {
        Ok(()) => info!("Background saving terminated with success"),
        Err(e) => error!(error = %e, "Background saving failed"),
    });
    Ok(Reply::status("Background saving started"))
}

// ========================================================================
// Introspection
// ========================================================================

/// INFO [section]
fn info_cmd(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let records = ctx.store().len()?;
    let text = format!(
        "# Server\r\n\
         raptorkv_version:{}\r\n\
         os:{}\r\n\
         uptime_in_seconds:{}\r\n\
         \r\n\
         # Stats\r\n\
         total_commands_processed:{}\r\n\
         \r\n\
         # Keyspace\r\n\
         db0:records={}\r\n",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        ctx.server.uptime_secs(),
        ctx.server.commands_processed(),
        records,
    );
    Ok(Reply::bulk(Bytes::from(text)))
}

/// COMMAND
fn command(ctx: &mut Context<'_>) -> CommandResult<Reply> {
    let names = ctx.table.names();
    Ok(Reply::bulks(
        names.into_iter().map(|name| Bytes::from_static(name.as_bytes())),
    ))
}
