use calcrpc::{
    calculator::{Calculator, CalculatorClient, CalculatorServer, Number, SquareRootCalculator},
    BindError, BindingError, Channel, RpcError, Server, ServerConfig, ServerState, ServiceBinding,
    Status, TransportError,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::TcpStream, time::sleep};

/// Square roots that take a while and record how many run at once.
#[derive(Clone, Default)]
struct SlowCalculator {
    delay: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl SlowCalculator {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

impl Calculator for SlowCalculator {
    fn square_root(&self, request: Number) -> Result<Number, Status> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        SquareRootCalculator.square_root(request)
    }
}

async fn start(config: ServerConfig, handler: SlowCalculator) -> (Server, CalculatorClient) {
    let mut server = Server::with_config(config);
    server.add_service(CalculatorServer::new(handler)).unwrap();
    let addr = server.bind("127.0.0.1:0").await.unwrap();
    let channel = Channel::open(&addr.to_string()).await.unwrap();
    (server, CalculatorClient::new(channel))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_queues_instead_of_dropping() {
    const WORKERS: usize = 2;
    let handler = SlowCalculator::new(Duration::from_millis(100));
    let config = ServerConfig::default().with_workers(WORKERS);
    let (server, calculator) = start(config, handler.clone()).await;

    let calls: Vec<_> = (0..WORKERS + 2)
        .map(|_| {
            let calculator = calculator.clone();
            tokio::spawn(async move { calculator.square_root(Number { value: 81.0 }).await })
        })
        .collect();
    for call in calls {
        assert_eq!(call.await.unwrap().unwrap().value, 9.0);
    }

    assert_eq!(handler.finished.load(Ordering::SeqCst), WORKERS + 2);
    // Full parallelism up to the pool size, never beyond it.
    assert_eq!(handler.peak.load(Ordering::SeqCst), WORKERS);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_mid_burst_drains_in_flight_calls() {
    const WORKERS: usize = 2;
    let handler = SlowCalculator::new(Duration::from_millis(150));
    let config = ServerConfig::default()
        .with_workers(WORKERS)
        .with_grace_period(Duration::from_secs(5));
    let (server, calculator) = start(config, handler.clone()).await;
    let addr = calculator.channel().peer_addr();

    let calls: Vec<_> = (0..WORKERS + 2)
        .map(|_| {
            let calculator = calculator.clone();
            tokio::spawn(async move { calculator.square_root(Number { value: 4.0 }).await })
        })
        .collect();
    sleep(Duration::from_millis(50)).await;

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
    // Everything accepted before stop() finished before stop() returned.
    assert_eq!(handler.finished.load(Ordering::SeqCst), WORKERS + 2);

    for call in calls {
        assert_eq!(call.await.unwrap().unwrap().value, 2.0);
    }
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn grace_period_expiry_abandons_calls() {
    let handler = SlowCalculator::new(Duration::from_millis(500));
    let config = ServerConfig::default().with_grace_period(Duration::from_millis(50));
    let (server, calculator) = start(config, handler).await;

    let call = tokio::spawn(async move { calculator.square_root(Number { value: 1.0 }).await });
    sleep(Duration::from_millis(50)).await;
    server.stop().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(
        matches!(err, RpcError::Transport(TransportError::Reset(_))),
        "{err}"
    );
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (server, _calculator) = start(ServerConfig::default(), SlowCalculator::default()).await;
    assert_eq!(server.state(), ServerState::Listening);

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);

    server.stopped().await;
}

#[tokio::test]
async fn concurrent_stops_both_return() {
    let (server, _calculator) = start(ServerConfig::default(), SlowCalculator::default()).await;
    tokio::join!(server.stop(), server.stop(), server.stopped());
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn stop_before_bind() {
    let server = Server::new();
    assert_eq!(server.state(), ServerState::Created);
    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(matches!(
        server.bind("127.0.0.1:0").await,
        Err(BindError::State(ServerState::Stopped))
    ));
}

#[tokio::test]
async fn bind_failures_leave_server_created() {
    let (first, calculator) = start(ServerConfig::default(), SlowCalculator::default()).await;
    let taken = calculator.channel().peer_addr().to_string();

    let mut second = Server::new();
    second
        .add_service(CalculatorServer::new(SquareRootCalculator))
        .unwrap();

    let err = second.bind(&taken).await.unwrap_err();
    assert!(matches!(err, BindError::AddrInUse { .. }), "{err}");
    assert_eq!(second.state(), ServerState::Created);

    for malformed in ["no-port", "127.0.0.1:http", ":8080", "127.0.0.1:70000"] {
        let err = second.bind(malformed).await.unwrap_err();
        assert!(matches!(err, BindError::Malformed { .. }), "{malformed}: {err}");
        assert_eq!(second.state(), ServerState::Created);
    }

    // Still usable after the failures.
    second.bind("127.0.0.1:0").await.unwrap();
    assert_eq!(second.state(), ServerState::Listening);
    assert!(matches!(
        second.bind("127.0.0.1:0").await,
        Err(BindError::State(ServerState::Listening))
    ));

    second.stop().await;
    first.stop().await;
}

#[tokio::test]
async fn services_are_fixed_once_listening() {
    let mut server = Server::new();
    server
        .add_service(CalculatorServer::new(SquareRootCalculator))
        .unwrap();
    assert!(matches!(
        server.add_service(CalculatorServer::new(SquareRootCalculator)),
        Err(BindingError::DuplicateService("Calculator"))
    ));

    server.bind("127.0.0.1:0").await.unwrap();
    let empty = ServiceBinding::new(&calcrpc::calculator::CALCULATOR_SERVICE);
    assert!(matches!(
        server.add_service(empty),
        Err(BindingError::AlreadyStarted)
    ));
    server.stop().await;
}

#[test]
fn incomplete_binding_is_rejected() {
    let mut server = Server::new();
    let empty = ServiceBinding::new(&calcrpc::calculator::CALCULATOR_SERVICE);
    assert!(matches!(
        server.add_service(empty),
        Err(BindingError::MissingMethod { .. })
    ));
    assert!(server.services().is_empty());
}
