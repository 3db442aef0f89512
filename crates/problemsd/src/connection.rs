use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error};

use libproblems::broker::{ProblemsBroker, SharedBroker};
use libproblems::element::ElementValue;
use libproblems::error::Result;
use problems_protocol::{ElementPayload, ErrorCode, Event, Request, Response};

/// Handle a single client connection. The peer uid is fixed for the whole
/// connection; every broker call carries it.
pub async fn handle_client(stream: UnixStream, state: SharedBroker, bus: String, uid: u32) {
    let (reader, writer) = stream.into_split();
    let reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    // Events flow over the same connection, interleaved with responses.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    state.lock().await.register_client(&bus, event_tx);
    let event_writer = Arc::clone(&writer);
    let forwarder = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let mut w = event_writer.lock().await;
            if write_response(&mut w, &Response::Event(event)).await.is_err() {
                break;
            }
        }
    });

    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(bus = %bus, "client disconnected");
                break;
            }
            Err(e) => {
                error!(bus = %bus, "read error: {e}");
                break;
            }
        };

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = Response::Error {
                    message: format!("invalid request: {e}"),
                    code: ErrorCode::InvalidRequest,
                };
                let mut w = writer.lock().await;
                let _ = write_response(&mut w, &resp).await;
                continue;
            }
        };

        let response = match handle_request(request, &state, &bus, uid).await {
            Ok(response) => response,
            Err(e) => {
                let (code, message) = e.to_error_code();
                Response::Error { message, code }
            }
        };

        let mut w = writer.lock().await;
        if let Err(e) = write_response(&mut w, &response).await {
            error!(bus = %bus, "write error: {e}");
            break;
        }
    }

    // Teardown revokes authorization, cancels tasks, drops temporary entries
    state.lock().await.disconnect(&bus);
    forwarder.abort();
}

fn to_values(elements: BTreeMap<String, ElementPayload>) -> BTreeMap<String, ElementValue> {
    elements.into_iter().map(|(k, v)| (k, v.into())).collect()
}

fn ok(data: serde_json::Value) -> Response {
    Response::Ok { data: Some(data) }
}

fn ok_empty() -> Response {
    Response::Ok { data: None }
}

async fn handle_request(
    request: Request,
    state: &SharedBroker,
    bus: &str,
    uid: u32,
) -> Result<Response> {
    match request {
        Request::GetSession => {
            let session = state.lock().await.get_session(bus, uid)?;
            Ok(ok(serde_json::json!({ "session": session })))
        }

        Request::Authorize {
            message,
            peer_bus,
            peer_token,
        } => {
            let result =
                ProblemsBroker::authorize(state, bus, uid, message, peer_bus, peer_token).await?;
            Ok(ok(serde_json::json!({ "result": result })))
        }

        Request::GenerateToken { lifetime_secs } => {
            let token = state.lock().await.generate_token(bus, uid, lifetime_secs)?;
            Ok(ok(serde_json::json!({ "token": token })))
        }

        Request::RevokeToken { token } => {
            state.lock().await.revoke_token(bus, uid, &token)?;
            Ok(ok_empty())
        }

        Request::RevokeAuthorization => {
            state.lock().await.revoke_authorization(bus, uid)?;
            Ok(ok_empty())
        }

        Request::CloseSession => {
            state.lock().await.close_session(bus)?;
            Ok(ok_empty())
        }

        Request::SessionIsAuthorized => {
            let authorized = state.lock().await.session_is_authorized(bus, uid)?;
            Ok(ok(serde_json::json!({ "authorized": authorized })))
        }

        Request::NewProblem { elements, flags } => {
            let task =
                ProblemsBroker::new_problem(state, bus, uid, to_values(elements), flags).await?;
            Ok(ok(serde_json::json!({ "task": task })))
        }

        Request::TaskStart { task } => {
            ProblemsBroker::start_task(state, bus, &task).await?;
            Ok(ok_empty())
        }

        Request::TaskCancel { task } => {
            state.lock().await.cancel_task(bus, &task)?;
            Ok(ok_empty())
        }

        Request::TaskFinish { task } => {
            let (details, code) = state.lock().await.finish_task(bus, &task)?;
            Ok(ok(serde_json::json!({ "details": details, "code": code })))
        }

        Request::TaskStatus { task } => {
            let status = state.lock().await.task_status(bus, &task)?;
            Ok(ok(
                serde_json::json!({ "status": status, "code": status.code() }),
            ))
        }

        Request::TaskDetails { task } => {
            let details = state.lock().await.task_details(bus, &task)?;
            Ok(ok(serde_json::json!({ "details": details })))
        }

        Request::GetProblems { flags } => {
            let entries = state.lock().await.get_problems(bus, uid, flags)?;
            Ok(ok(serde_json::json!({ "entries": entries })))
        }

        Request::GetProblemData { entry } => {
            let elements = state.lock().await.get_problem_data(bus, uid, &entry)?;
            Ok(ok(serde_json::json!({ "elements": elements })))
        }

        Request::DeleteProblems { entries } => {
            state.lock().await.delete_problems(bus, uid, &entries)?;
            Ok(ok_empty())
        }

        Request::ReadElements {
            entry,
            names,
            flags,
        } => {
            let elements = state
                .lock()
                .await
                .read_elements(bus, uid, &entry, &names, flags)?;
            Ok(ok(serde_json::json!({ "elements": elements })))
        }

        Request::SaveElements {
            entry,
            elements,
            flags,
        } => {
            state
                .lock()
                .await
                .save_elements(bus, uid, &entry, to_values(elements), flags)?;
            Ok(ok_empty())
        }

        Request::DeleteElements { entry, names } => {
            state.lock().await.delete_elements(bus, uid, &entry, &names)?;
            Ok(ok_empty())
        }

        Request::EntryInfo { entry } => {
            let info = state.lock().await.entry_info(bus, uid, &entry)?;
            Ok(ok(serde_json::json!({ "info": info })))
        }
    }
}

async fn write_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &Response,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response).map_err(std::io::Error::other)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}
