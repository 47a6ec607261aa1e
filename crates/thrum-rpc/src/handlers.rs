// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::{json, Value};
use thrum_writer::{Intent, WriterError};

use crate::context::RpcContext;
use crate::protocol::{JsonRpcError, HANDLER_ERROR};

/// Dispatch one already-whitelist-checked method call.
pub async fn dispatch(ctx: &RpcContext, method: &str, params: Value) -> Result<Value, JsonRpcError> {
    match method {
        "ping" => Ok(json!("pong")),
        "health" => health(ctx).await,

        "agent.register" => agent_register(ctx, params).await,
        "agent.list" => agent_list(ctx).await,
        "agent.whoami" => agent_whoami(ctx, params).await,
        "agent.delete" | "agent.cleanup" => agent_cleanup(ctx, params).await,

        "session.start" => session_start(ctx, params).await,
        "session.end" => session_end(ctx, params).await,
        "session.heartbeat" => session_heartbeat(ctx, params).await,
        "session.set_intent" => session_set_intent(ctx, params).await,

        "message.send" => message_send(ctx, params).await,
        "message.reply" => message_reply(ctx, params).await,
        "message.edit" => message_edit(ctx, params).await,
        "message.delete" => message_delete(ctx, params).await,
        "message.list" => message_list(ctx, params).await,
        "message.get" => message_get(ctx, params).await,
        "message.mark_read" => message_mark_read(ctx, params).await,

        "group.create" => group_create(ctx, params).await,
        "group.delete" => group_delete(ctx, params).await,
        "group.add" => group_add(ctx, params).await,
        "group.remove" => group_remove(ctx, params).await,
        "group.list" => group_list(ctx).await,
        "group.get" => group_get(ctx, params).await,

        "subscription.add" => subscription_add(ctx, params).await,
        "subscription.remove" => subscription_remove(ctx, params).await,
        "subscription.list" => subscription_list(ctx, params).await,

        "wait" => wait(ctx, params).await,
        "who_has" => who_has(ctx, params).await,

        "context.save" => context_save(ctx, params, false).await,
        "context.show" => context_show(ctx, params, false).await,
        "context.clear" => context_clear(ctx, params, false).await,
        "preamble.save" => context_save(ctx, params, true).await,
        "preamble.show" => context_show(ctx, params, true).await,

        "peer.add" => ctx.sync_backend.pair_add().await,
        "peer.join" => {
            let address = str_param(&params, "address")?;
            let code = str_param(&params, "code")?;
            ctx.sync_backend.pair_join(&address, &code).await
        }
        "peer.list" => Ok(ctx.sync_backend.peer_list().await),
        "peer.remove" => {
            let daemon_id = str_param(&params, "daemon_id")?;
            ctx.sync_backend.peer_remove(&daemon_id).await.map(|_| json!({"removed": true}))
        }
        "peer.status" => {
            let daemon_id = str_param(&params, "daemon_id")?;
            ctx.sync_backend.peer_status(&daemon_id).await
        }
        "tsync.force" => ctx.sync_backend.force_sync().await,

        "sync.pull" => sync_pull(ctx, params).await,
        "sync.peer_info" => Ok(ctx.sync_backend.peer_info().await),
        "sync.notify" => sync_notify(ctx, params).await,
        "pair.request" => pair_request(ctx, params).await,

        other => Err(JsonRpcError::method_not_found(other)),
    }
}

fn str_param(params: &Value, field: &str) -> Result<String, JsonRpcError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| JsonRpcError::new(HANDLER_ERROR, format!("missing required param: {field}")))
}

fn opt_str_param(params: &Value, field: &str) -> Option<String> {
    params.get(field).and_then(Value::as_str).map(str::to_string)
}

fn writer_err(e: WriterError) -> JsonRpcError {
    match &e {
        WriterError::Conflict { existing_agent_id } => JsonRpcError::with_data(
            HANDLER_ERROR,
            e.to_string(),
            json!({"status": "conflict", "existing_agent_id": existing_agent_id}),
        ),
        _ => JsonRpcError::new(HANDLER_ERROR, e.to_string()),
    }
}

fn projection_err(e: thrum_projection::ProjectionError) -> JsonRpcError {
    JsonRpcError::new(HANDLER_ERROR, e.to_string())
}

async fn health(ctx: &RpcContext) -> Result<Value, JsonRpcError> {
    Ok(json!({
        "daemon_id": ctx.daemon_id,
        "agents": ctx.projection.list_agents().map_err(projection_err)?.len(),
    }))
}

async fn agent_register(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let agent_id = str_param(&params, "agent_id")?;
    let re_register = params.get("re_register").and_then(Value::as_bool).unwrap_or(false);
    let force = params.get("force").and_then(Value::as_bool).unwrap_or(false);

    if !force && !re_register {
        if let Some(existing) = ctx.projection.get_agent(&agent_id).map_err(projection_err)? {
            if existing.agent_id == agent_id {
                return Ok(json!({"status": "registered", "agent_id": agent_id}));
            }
        }
    }

    let intent = Intent::RegisterAgent {
        agent_id: agent_id.clone(),
        role: str_param(&params, "role")?,
        module: str_param(&params, "module")?,
        display: opt_str_param(&params, "display"),
        hostname: opt_str_param(&params, "hostname"),
        worktree_path: opt_str_param(&params, "worktree_path"),
        force,
    };
    let result = ctx.writer.commit(intent).await.map_err(writer_err)?;
    let status = if re_register { "updated" } else { "registered" };
    Ok(json!({"status": status, "event_id": result.event.event_id, "agent_id": agent_id}))
}

async fn agent_list(ctx: &RpcContext) -> Result<Value, JsonRpcError> {
    let agents = ctx.projection.list_agents().map_err(projection_err)?;
    Ok(json!(agents))
}

async fn agent_whoami(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let agent_id = str_param(&params, "agent_id")?;
    let agent = ctx
        .projection
        .get_agent(&agent_id)
        .map_err(projection_err)?
        .ok_or_else(|| JsonRpcError::new(HANDLER_ERROR, format!("unknown agent: {agent_id}")))?;
    Ok(json!(agent))
}

async fn agent_cleanup(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let agent_id = str_param(&params, "agent_id")?;
    ctx.writer
        .commit(Intent::CleanupAgent { agent_id })
        .await
        .map_err(writer_err)?;
    Ok(json!({"status": "removed"}))
}

async fn session_start(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let session_token = thrum_ids::new_session_token();
    let intent = Intent::StartSession {
        session_token: session_token.clone(),
        agent_id: str_param(&params, "agent_id")?,
        intent: opt_str_param(&params, "intent"),
        transport: opt_str_param(&params, "transport").unwrap_or_else(|| "local".to_string()),
    };
    ctx.writer.commit(intent).await.map_err(writer_err)?;
    Ok(json!({"session_token": session_token}))
}

async fn session_end(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let session_token = str_param(&params, "session_token")?;
    ctx.writer
        .commit(Intent::EndSession { session_token })
        .await
        .map_err(writer_err)?;
    Ok(json!({"status": "ended"}))
}

async fn session_heartbeat(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let agent_id = str_param(&params, "agent_id")?;
    ctx.writer
        .commit(Intent::Heartbeat { agent_id, intent: None })
        .await
        .map_err(writer_err)?;
    Ok(json!({"status": "alive"}))
}

async fn session_set_intent(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    // Same derivation path as a heartbeat: it refreshes last_seen and also
    // updates the agent's current intent string.
    let agent_id = str_param(&params, "agent_id")?;
    let intent = opt_str_param(&params, "intent");
    ctx.writer
        .commit(Intent::Heartbeat { agent_id, intent })
        .await
        .map_err(writer_err)?;
    Ok(json!({"status": "ok"}))
}

#[allow(clippy::too_many_lines)]
async fn message_send(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let message_id = thrum_ids::new_message_id();
    let intent = Intent::CreateMessage {
        message_id: message_id.clone(),
        agent_id: str_param(&params, "agent_id")?,
        authored_by: str_param(&params, "agent_id")?,
        content: str_param(&params, "content")?,
        format: opt_str_param(&params, "format").unwrap_or_else(|| "markdown".to_string()),
        scopes: params.get("scopes").cloned().unwrap_or(json!([])),
        mentions: params.get("mentions").cloned().unwrap_or(json!([])),
        priority: params.get("priority").and_then(Value::as_i64).unwrap_or(0),
        reply_to: opt_str_param(&params, "reply_to"),
        thread_id: opt_str_param(&params, "thread_id"),
    };
    ctx.writer.commit(intent).await.map_err(writer_err)?;
    Ok(json!({"message_id": message_id}))
}

async fn message_reply(ctx: &RpcContext, mut params: Value) -> Result<Value, JsonRpcError> {
    let reply_to = str_param(&params, "reply_to")?;
    if let Some(original) = ctx.projection.get_message(&reply_to).map_err(projection_err)? {
        if params.get("thread_id").is_none() {
            let thread_id = original.thread_id.unwrap_or(reply_to.clone());
            params["thread_id"] = json!(thread_id);
        }
    }
    message_send(ctx, params).await
}

async fn message_edit(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let intent = Intent::EditMessage {
        message_id: str_param(&params, "message_id")?,
        content: opt_str_param(&params, "content"),
        format: opt_str_param(&params, "format"),
    };
    ctx.writer.commit(intent).await.map_err(writer_err)?;
    Ok(json!({"status": "edited"}))
}

async fn message_delete(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let message_id = str_param(&params, "message_id")?;
    ctx.writer
        .commit(Intent::DeleteMessage { message_id })
        .await
        .map_err(writer_err)?;
    Ok(json!({"status": "deleted"}))
}

async fn message_list(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let agent_id = str_param(&params, "agent_id")?;
    let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(50) as usize;
    let messages = ctx
        .projection
        .list_messages_for(&agent_id, limit)
        .map_err(projection_err)?;
    Ok(json!(messages))
}

async fn message_get(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let message_id = str_param(&params, "message_id")?;
    let message = ctx
        .projection
        .get_message(&message_id)
        .map_err(projection_err)?
        .ok_or_else(|| JsonRpcError::new(HANDLER_ERROR, format!("unknown message: {message_id}")))?;
    Ok(json!(message))
}

async fn message_mark_read(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let intent = Intent::MarkRead {
        message_id: str_param(&params, "message_id")?,
        agent_id: str_param(&params, "agent_id")?,
    };
    ctx.writer.commit(intent).await.map_err(writer_err)?;
    Ok(json!({"status": "read"}))
}

async fn group_create(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let members = params
        .get("members")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let intent = Intent::CreateGroup {
        name: str_param(&params, "name")?,
        members,
    };
    ctx.writer.commit(intent).await.map_err(writer_err)?;
    Ok(json!({"status": "created"}))
}

async fn group_delete(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let name = str_param(&params, "name")?;
    ctx.writer.commit(Intent::DeleteGroup { name }).await.map_err(writer_err)?;
    Ok(json!({"status": "deleted"}))
}

async fn group_add(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let intent = Intent::AddMember {
        name: str_param(&params, "name")?,
        member: str_param(&params, "member")?,
    };
    ctx.writer.commit(intent).await.map_err(writer_err)?;
    Ok(json!({"status": "added"}))
}

async fn group_remove(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let intent = Intent::RemoveMember {
        name: str_param(&params, "name")?,
        member: str_param(&params, "member")?,
    };
    ctx.writer.commit(intent).await.map_err(writer_err)?;
    Ok(json!({"status": "removed"}))
}

async fn group_list(ctx: &RpcContext) -> Result<Value, JsonRpcError> {
    let groups = ctx.projection.list_groups().map_err(projection_err)?;
    Ok(json!(groups))
}

async fn group_get(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let name = str_param(&params, "name")?;
    let members = ctx.projection.group_members(&name).map_err(projection_err)?;
    Ok(json!({"name": name, "members": members}))
}

async fn subscription_add(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let subscription_id = thrum_ids::new_id("sub_");
    let row = thrum_projection::SubscriptionRow {
        subscription_id: subscription_id.clone(),
        session_id: str_param(&params, "session_id")?,
        scope: params.get("scope").cloned(),
        mention: params.get("mention").cloned(),
        match_all: params.get("match_all").and_then(Value::as_bool).unwrap_or(false),
    };
    ctx.projection.add_subscription(&row).map_err(projection_err)?;
    Ok(json!({"subscription_id": subscription_id}))
}

async fn subscription_remove(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let subscription_id = str_param(&params, "subscription_id")?;
    ctx.projection.remove_subscription(&subscription_id).map_err(projection_err)?;
    Ok(json!({"status": "removed"}))
}

async fn subscription_list(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let session_id = str_param(&params, "session_id")?;
    let subs = ctx
        .projection
        .subscriptions_for_session(&session_id)
        .map_err(projection_err)?;
    Ok(json!(subs))
}

async fn wait(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let session_id = str_param(&params, "session_id")?;
    let timeout_ms = params.get("timeout_ms").and_then(Value::as_u64).unwrap_or(30_000);

    let mut waiters = ctx.waiters.lock().await;
    let receiver = waiters
        .get_mut(&session_id)
        .ok_or_else(|| JsonRpcError::new(HANDLER_ERROR, "no active wait registration for session"))?;

    match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), receiver.recv()).await {
        Ok(Some(payload)) => Ok(payload),
        Ok(None) => Err(JsonRpcError::new(HANDLER_ERROR, "notification channel closed")),
        Err(_) => Ok(json!({"timed_out": true})),
    }
}

async fn who_has(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let role = str_param(&params, "role")?;
    let module = str_param(&params, "module")?;
    let agent = ctx
        .projection
        .find_agent_by_role_module(&role, &module)
        .map_err(projection_err)?;
    Ok(json!(agent))
}

fn context_path(ctx: &RpcContext, name: &str, preamble: bool) -> Result<std::path::PathBuf, JsonRpcError> {
    if name.contains('/') || name.contains("..") {
        return Err(JsonRpcError::new(HANDLER_ERROR, "invalid context name"));
    }
    let file_name = if preamble {
        format!("{name}_preamble.md")
    } else {
        format!("{name}.md")
    };
    Ok(ctx.context_dir.join(file_name))
}

async fn context_save(ctx: &RpcContext, params: Value, preamble: bool) -> Result<Value, JsonRpcError> {
    let name = str_param(&params, "name")?;
    let content = str_param(&params, "content")?;
    let path = context_path(ctx, &name, preamble)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| JsonRpcError::new(HANDLER_ERROR, format!("creating context dir: {e}")))?;
    }
    std::fs::write(&path, content).map_err(|e| JsonRpcError::new(HANDLER_ERROR, format!("writing context: {e}")))?;
    Ok(json!({"status": "saved"}))
}

async fn context_show(ctx: &RpcContext, params: Value, preamble: bool) -> Result<Value, JsonRpcError> {
    let name = str_param(&params, "name")?;
    let path = context_path(ctx, &name, preamble)?;
    let content = std::fs::read_to_string(&path).unwrap_or_default();
    Ok(json!({"name": name, "content": content}))
}

async fn context_clear(ctx: &RpcContext, params: Value, preamble: bool) -> Result<Value, JsonRpcError> {
    let name = str_param(&params, "name")?;
    let path = context_path(ctx, &name, preamble)?;
    let _ = std::fs::remove_file(&path);
    Ok(json!({"status": "cleared"}))
}

async fn sync_pull(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let token = str_param(&params, "token")?;
    let after_sequence = params.get("after_sequence").and_then(Value::as_u64).unwrap_or(0);
    let max_batch = params.get("max_batch").and_then(Value::as_u64).unwrap_or(1000) as usize;
    let page = ctx.sync_backend.pull(&token, after_sequence, max_batch).await?;
    Ok(json!({
        "events": page.events,
        "next_sequence": page.next_sequence,
        "more_available": page.more_available,
    }))
}

async fn sync_notify(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let token = str_param(&params, "token")?;
    let daemon_id = str_param(&params, "daemon_id")?;
    let latest_seq = params.get("latest_seq").and_then(Value::as_u64).unwrap_or(0);
    let event_count = params.get("event_count").and_then(Value::as_u64).unwrap_or(0);
    ctx.sync_backend.notify(&token, &daemon_id, latest_seq, event_count).await?;
    Ok(json!({"status": "acknowledged"}))
}

async fn pair_request(ctx: &RpcContext, params: Value) -> Result<Value, JsonRpcError> {
    let code = str_param(&params, "code")?;
    let daemon_id = str_param(&params, "daemon_id")?;
    let name = str_param(&params, "name")?;
    let address = str_param(&params, "address")?;
    ctx.sync_backend.pair_request(&code, &daemon_id, &name, &address).await
}
