//! In-memory stand-in for the Docker Engine
//!
//! Implements just enough of the control API for unit tests: images that can
//! be pulled or removed, containers that accept an archive, run a scripted
//! program on `wait`, and serve framed logs.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use crate::docker::frame::{LogFrame, StreamKind, encode_frames};
use crate::docker::{DockerError, Method, RequestBody, Response, Transport, unpack_file};

type Program = Arc<dyn Fn(&ContainerSpec) -> (String, String, i64) + Send + Sync>;

/// A request as seen by the fake engine
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// What a container was created with, plus the files uploaded into it
#[derive(Debug, Clone, Default)]
pub(crate) struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    /// Keyed by `dir/name`
    pub files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct FakeContainer {
    spec: ContainerSpec,
    started: bool,
    output: Option<(String, String, i64)>,
}

#[derive(Default)]
struct State {
    images: HashSet<String>,
    pullable: HashSet<String>,
    held: HashSet<String>,
    containers: HashMap<String, FakeContainer>,
    created: usize,
    requests: Vec<RecordedRequest>,
    overrides: VecDeque<(Method, String, Response)>,
    unavailable: bool,
    wait_delay: Option<Duration>,
    program: Option<Program>,
}

struct Engine {
    state: Mutex<State>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeEngine").finish_non_exhaustive()
    }
}

/// Handle to a fake engine; clones share state
#[derive(Clone)]
pub(crate) struct FakeDocker {
    engine: Arc<Engine>,
}

impl FakeDocker {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(Engine {
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.engine.clone()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.engine.state.lock().unwrap())
    }

    /// Mark an image as present locally
    pub fn add_image(&self, image: &str) {
        self.with(|s| s.images.insert(image.to_owned()));
    }

    /// Mark an image as available from the registry
    pub fn add_pullable(&self, image: &str) {
        self.with(|s| s.pullable.insert(image.to_owned()));
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.with(|s| s.images.contains(image))
    }

    /// Pretend some container outside our control uses `image`
    pub fn hold_image(&self, image: &str) {
        self.with(|s| s.held.insert(image.to_owned()));
    }

    /// Answer the next request matching `method` and `path_prefix` with `response`
    pub fn respond_once(&self, method: Method, path_prefix: &str, response: Response) {
        self.with(|s| {
            s.overrides
                .push_back((method, path_prefix.to_owned(), response))
        });
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.with(|s| s.unavailable = unavailable);
    }

    /// Delay every `wait` call, simulating a long-running program
    pub fn set_wait_delay(&self, delay: Duration) {
        self.with(|s| s.wait_delay = Some(delay));
    }

    /// Script what containers print and exit with
    pub fn set_program<F>(&self, program: F)
    where
        F: Fn(&ContainerSpec) -> (String, String, i64) + Send + Sync + 'static,
    {
        self.with(|s| s.program = Some(Arc::new(program)));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.with(|s| s.requests.clone())
    }

    /// Ids of containers that have not been removed
    pub fn live_containers(&self) -> Vec<String> {
        self.with(|s| s.containers.keys().cloned().collect())
    }

    /// Number of containers ever created
    pub fn created_count(&self) -> usize {
        self.with(|s| s.created)
    }

    pub fn container_spec(&self, id: &str) -> Option<ContainerSpec> {
        self.with(|s| s.containers.get(id).map(|c| c.spec.clone()))
    }

    pub fn container_file(&self, id: &str, dir: &str, name: &str) -> Option<Vec<u8>> {
        self.with(|s| {
            s.containers
                .get(id)
                .and_then(|c| c.spec.files.get(&file_key(dir, name)).cloned())
        })
    }

    /// Drop a container behind the client's back
    pub fn forget_container(&self, id: &str) {
        self.with(|s| s.containers.remove(id));
    }
}

fn file_key(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}

fn message(status: u16, text: &str) -> Response {
    Response::new(status, json!({ "message": text }).to_string())
}

fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| urlencoding::decode(v).map(|v| v.into_owned()).ok())?
    })
}

fn default_program(spec: &ContainerSpec) -> (String, String, i64) {
    let stdout = spec
        .files
        .values()
        .map(|content| String::from_utf8_lossy(content).into_owned())
        .collect();
    (stdout, String::new(), 0)
}

impl State {
    fn route(&mut self, method: &Method, path: &str, body: Option<&RequestBody>) -> Response {
        let (route, query) = path.split_once('?').unwrap_or((path, ""));

        if let Some(pos) = self
            .overrides
            .iter()
            .position(|(m, prefix, _)| m == method && path.starts_with(prefix.as_str()))
            && let Some((_, _, response)) = self.overrides.remove(pos)
        {
            return response;
        }

        if route == "/images/create" && *method == Method::POST {
            let image = query_param(query, "fromImage").unwrap_or_default();
            if self.images.contains(&image) {
                return Response::new(200, "{\"status\":\"Image is up to date\"}\n");
            }
            if self.pullable.remove(&image) {
                self.images.insert(image);
                return Response::new(200, "{\"status\":\"Downloaded newer image\"}\n");
            }
            return message(404, "pull access denied or repository does not exist");
        }

        if let Some(rest) = route.strip_prefix("/images/") {
            return self.route_image(method, rest);
        }

        if route == "/containers/create" && *method == Method::POST {
            return self.create_container(body);
        }

        if let Some(rest) = route.strip_prefix("/containers/") {
            let (id, action) = rest.split_once('/').unwrap_or((rest, ""));
            return self.route_container(method, id, action, query, body);
        }

        message(404, "page not found")
    }

    fn route_image(&mut self, method: &Method, rest: &str) -> Response {
        let (encoded, inspect) = match rest.strip_suffix("/json") {
            Some(name) => (name, true),
            None => (rest, false),
        };
        let image = urlencoding::decode(encoded)
            .map(|s| s.into_owned())
            .unwrap_or_default();

        if *method == Method::GET && inspect {
            return if self.images.contains(&image) {
                Response::new(200, json!({ "RepoTags": [image] }).to_string())
            } else {
                message(404, "No such image")
            };
        }

        if *method == Method::DELETE && !inspect {
            if !self.images.contains(&image) {
                return message(404, "No such image");
            }
            let in_use = self.held.contains(&image)
                || self.containers.values().any(|c| c.spec.image == image);
            if in_use {
                return message(409, "conflict: image is being used by a container");
            }
            self.images.remove(&image);
            return Response::new(200, json!([{ "Untagged": image }]).to_string());
        }

        message(404, "page not found")
    }

    fn create_container(&mut self, body: Option<&RequestBody>) -> Response {
        let Some(body) = body else {
            return message(400, "missing body");
        };
        let Ok(config) = serde_json::from_slice::<serde_json::Value>(body.bytes()) else {
            return message(400, "invalid JSON");
        };

        let image = config["Image"].as_str().unwrap_or_default().to_owned();
        if !self.images.contains(&image) {
            return message(404, &format!("No such image: {image}"));
        }

        self.created += 1;
        let id = format!("{:064x}", self.created);
        let spec = ContainerSpec {
            image,
            cmd: config["Cmd"]
                .as_array()
                .map(|args| {
                    args.iter()
                        .filter_map(|a| a.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default(),
            working_dir: config["WorkingDir"].as_str().map(str::to_owned),
            files: BTreeMap::new(),
        };
        self.containers.insert(
            id.clone(),
            FakeContainer {
                spec,
                ..Default::default()
            },
        );
        Response::new(201, json!({ "Id": id, "Warnings": [] }).to_string())
    }

    fn route_container(
        &mut self,
        method: &Method,
        id: &str,
        action: &str,
        query: &str,
        body: Option<&RequestBody>,
    ) -> Response {
        let program = self.program.clone();
        let Some(container) = self.containers.get_mut(id) else {
            return message(404, &format!("No such container: {id}"));
        };

        match action {
            "archive" if *method == Method::PUT => {
                let dir = query_param(query, "path").unwrap_or_default();
                let Some(body) = body else {
                    return message(400, "missing archive");
                };
                match unpack_file(body.bytes()) {
                    Ok((name, content)) => {
                        container.spec.files.insert(file_key(&dir, &name), content);
                        Response::new(200, "")
                    }
                    Err(e) => message(400, &e.to_string()),
                }
            }
            "start" if *method == Method::POST => {
                if container.started {
                    return Response::new(304, "");
                }
                container.started = true;
                Response::new(204, "")
            }
            "wait" if *method == Method::POST => {
                let output = match &program {
                    Some(program) => program(&container.spec),
                    None => default_program(&container.spec),
                };
                let code = output.2;
                container.output = Some(output);
                Response::new(200, json!({ "StatusCode": code }).to_string())
            }
            "logs" if *method == Method::GET => {
                let (stdout, stderr, _) = container.output.clone().unwrap_or_default();
                let mut frames = Vec::new();
                if query_param(query, "stdout").as_deref() == Some("1") {
                    // Split so the client has to stitch frames back together
                    for line in stdout.split_inclusive('\n') {
                        frames.push(LogFrame::new(StreamKind::Stdout, line.to_owned()));
                    }
                }
                if query_param(query, "stderr").as_deref() == Some("1") {
                    for line in stderr.split_inclusive('\n') {
                        frames.push(LogFrame::new(StreamKind::Stderr, line.to_owned()));
                    }
                }
                Response::new(200, encode_frames(frames))
            }
            "" if *method == Method::DELETE => {
                self.containers.remove(id);
                Response::new(204, "")
            }
            _ => message(404, "page not found"),
        }
    }
}

#[async_trait]
impl Transport for Engine {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Response, DockerError> {
        let wait_delay = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(RecordedRequest {
                method: method.clone(),
                path: path.to_owned(),
                content_type: body.as_ref().map(|b| b.content_type().to_owned()),
                body: body.as_ref().map(|b| b.bytes().clone()).unwrap_or_default(),
            });
            if state.unavailable {
                return Err(DockerError::Unavailable {
                    socket: PathBuf::from("/fake/docker.sock"),
                    message: "connection refused".to_owned(),
                });
            }
            state.wait_delay
        };

        if method == Method::POST
            && path.ends_with("/wait")
            && let Some(delay) = wait_delay
        {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        Ok(state.route(&method, path, body.as_ref()))
    }
}
