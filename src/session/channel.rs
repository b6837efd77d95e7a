use super::*;
use tokio::time::Instant;

/// Request/reply transport to one device.
///
/// Implementations carry opaque RPC bodies; framing and message ids are the
/// channel's business. Replies are returned raw and parsed by the session.
#[async_trait]
pub trait DeviceChannel: Send {
    /// Sends one RPC body and waits for its complete reply.
    async fn exec_rpc(&mut self, body: &str) -> Result<String, JunosError>;

    /// Ends the NETCONF session. Errors are informational.
    async fn close(&mut self) -> Result<(), JunosError>;

    fn is_connected(&self) -> bool;
}

/// Opens [`DeviceChannel`]s for a [`SessionManager`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DeviceChannel>, JunosError>;

    /// Target label used in logs and connection errors.
    fn describe(&self) -> String;
}

/// Default connector: NETCONF subsystem over SSH.
#[derive(Debug, Clone)]
pub struct NetconfSshConnector {
    config: Arc<ProviderConfig>,
}

impl NetconfSshConnector {
    pub fn new(config: Arc<ProviderConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for NetconfSshConnector {
    async fn connect(&self) -> Result<Box<dyn DeviceChannel>, JunosError> {
        let channel = NetconfSshChannel::connect(&self.config).await?;
        Ok(Box::new(channel))
    }

    fn describe(&self) -> String {
        self.config.device_addr()
    }
}

/// NETCONF 1.0 session on an SSH `netconf` subsystem channel.
pub struct NetconfSshChannel {
    client: Client,
    sender: Sender<Vec<u8>>,
    replies: ReplyStream,
    message_id: u64,
    device_addr: String,
    timeout: Duration,
}

impl NetconfSshChannel {
    pub async fn connect(config: &ProviderConfig) -> Result<Self, JunosError> {
        let device_addr = config.device_addr();
        let connection_error = |reason: String| JunosError::Connection {
            target: device_addr.clone(),
            reason,
        };

        let auth = match (&config.ssh_key_file, &config.password) {
            (Some(key_file), _) => AuthMethod::with_key_file(key_file, config.key_pass.as_deref()),
            (None, Some(password)) => AuthMethod::with_password(password),
            (None, None) => {
                return Err(JunosError::InvalidConfig(
                    "one of password or ssh_key_file is required".to_string(),
                ));
            }
        };
        let ssh_config = Config {
            preferred: config.ssh_security.preferred(),
            inactivity_timeout: Some(config.cmd_timeout() * 2),
            ..Default::default()
        };

        let client = tokio::time::timeout(
            config.connect_timeout(),
            Client::connect_with_config(
                (config.ip.clone(), config.port),
                &config.username,
                auth,
                config.server_check(),
                ssh_config,
            ),
        )
        .await
        .map_err(|_| connection_error(format!("timeout after {:?}", config.connect_timeout())))?
        .map_err(|e| connection_error(e.to_string()))?;
        debug!("{} TCP connection successful", device_addr);

        let channel = client
            .get_channel()
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        channel
            .request_subsystem(true, "netconf")
            .await
            .map_err(|e| connection_error(format!("netconf subsystem: {e}")))?;
        debug!("{} netconf subsystem started", device_addr);

        let (sender_to_device, mut receiver_from_session) = mpsc::channel::<Vec<u8>>(64);
        let (sender_to_session, receiver_from_device) = mpsc::channel::<String>(256);

        let io_task_device_addr = device_addr.clone();
        let mut channel = channel;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = receiver_from_session.recv() => {
                        if let Err(e) = channel.data(&data[..]).await {
                            debug!("{} Failed to send rpc: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let chunk = String::from_utf8_lossy(data).into_owned();
                                if sender_to_session.send(chunk).await.is_err() {
                                    debug!("{} Session dropped. Closing task.", io_task_device_addr);
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} netconf exited with status code: {}", io_task_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} netconf sent EOF.", io_task_device_addr);
                                break;
                            }
                            _ => {}
                        }
                    },
                    else => break,
                }
            }
            debug!("{} SSH I/O task ended.", io_task_device_addr);
        });

        let mut this = Self {
            client,
            sender: sender_to_device,
            replies: ReplyStream::new(receiver_from_device),
            message_id: 0,
            device_addr: device_addr.clone(),
            timeout: config.cmd_timeout(),
        };

        let server_hello = this
            .replies
            .next_frame(this.timeout)
            .await
            .map_err(|e| connection_error(format!("waiting for server hello: {e}")))?;
        if let Some(session_id) = netconf::tag_text(&server_hello, "session-id") {
            debug!("{} netconf session-id {}", this.device_addr, session_id.trim());
        }
        this.sender.send(netconf::client_hello().into_bytes()).await?;

        Ok(this)
    }
}

/// Framed replies from the I/O task.
///
/// A reply is only handed out for the request that is waiting on it; replies
/// to earlier requests that timed out are dropped when they finally arrive.
struct ReplyStream {
    recv: Receiver<String>,
    buffer: String,
}

impl ReplyStream {
    fn new(recv: Receiver<String>) -> Self {
        Self {
            recv,
            buffer: String::new(),
        }
    }

    /// Reads up to the next end-of-message marker.
    ///
    /// On timeout the partial frame stays buffered so the rest of it still
    /// lines up with the marker that ends it.
    async fn next_frame(&mut self, timeout: Duration) -> Result<String, JunosError> {
        let read = read_frame(&mut self.buffer, &mut self.recv);
        match tokio::time::timeout(timeout, read).await {
            Ok(result) => result,
            Err(_) => Err(JunosError::ExecTimeout(self.buffer.clone())),
        }
    }

    /// Waits for the reply carrying `message_id`, skipping stale ones.
    async fn reply_to(&mut self, message_id: u64, timeout: Duration) -> Result<String, JunosError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = self.next_frame(remaining).await?;
            match netconf::reply_message_id(&frame) {
                Some(id) if id != message_id => {
                    debug!("dropping stale reply to message {id} while waiting for {message_id}");
                }
                _ => return Ok(frame),
            }
        }
    }

    fn close(&mut self) {
        self.recv.close();
    }
}

async fn read_frame(buffer: &mut String, recv: &mut Receiver<String>) -> Result<String, JunosError> {
    loop {
        if let Some(pos) = buffer.find(netconf::DELIMITER) {
            let message: String = buffer.drain(..pos).collect();
            buffer.drain(..netconf::DELIMITER.len());
            return Ok(message);
        }
        match recv.recv().await {
            Some(chunk) => {
                trace!("{:?}", chunk);
                buffer.push_str(&chunk);
            }
            None => return Err(JunosError::ChannelDisconnect),
        }
    }
}

#[async_trait]
impl DeviceChannel for NetconfSshChannel {
    async fn exec_rpc(&mut self, body: &str) -> Result<String, JunosError> {
        self.message_id += 1;
        let rpc = netconf::wrap_rpc(self.message_id, body);
        trace!("{} >> {}", self.device_addr, rpc);
        self.sender.send(rpc.into_bytes()).await?;
        let reply = self.replies.reply_to(self.message_id, self.timeout).await?;
        trace!("{} << {}", self.device_addr, reply);
        Ok(reply)
    }

    async fn close(&mut self) -> Result<(), JunosError> {
        debug!("{} closing netconf session", self.device_addr);
        if self.is_connected() {
            // best effort, the device also cleans up when the channel drops
            if let Err(e) = self.exec_rpc(netconf::close_session()).await {
                debug!("{} close-session failed: {}", self.device_addr, e);
            }
        }
        self.replies.close();
        // async-ssh2-tokio closes the connection when the client is dropped
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }
}
