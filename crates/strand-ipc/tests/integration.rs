//! End-to-end tests for the IPC layer.
//!
//! Covers the full call path: proxy construction, pooled clients, server
//! dispatch with authorization, and the TCP transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strand_core::{CallerIdentity, PeerAddress, TypeDescriptor, Value};
use strand_ipc::*;

#[derive(Debug)]
struct Counter {
    invoker: Invoker,
}

impl VersionedProtocol for Counter {
    const NAME: &'static str = "CounterProtocol";
    const VERSION: u64 = 2;
}

impl ProtocolProxy for Counter {
    fn from_invoker(invoker: Invoker) -> Self {
        Self { invoker }
    }

    fn invoker(&self) -> &Invoker {
        &self.invoker
    }
}

fn add() -> MethodSignature {
    MethodSignature::new("add", vec![TypeDescriptor::Long], TypeDescriptor::Long)
}

fn divide() -> MethodSignature {
    MethodSignature::new(
        "divide",
        vec![TypeDescriptor::Long, TypeDescriptor::Long],
        TypeDescriptor::Long,
    )
}

impl Counter {
    async fn add(&self, n: i64) -> IpcResult<i64> {
        self.invoker.call_typed(&add(), vec![arg(n)?]).await
    }

    async fn divide(&self, a: i64, b: i64) -> IpcResult<i64> {
        self.invoker.call_typed(&divide(), vec![arg(a)?, arg(b)?]).await
    }
}

/// Counter table; `calls` counts handler executions.
fn counter_table(calls: Arc<AtomicUsize>) -> DispatchTable {
    let total = Arc::new(AtomicUsize::new(0));
    let divisions = calls.clone();
    DispatchTable::new(Counter::NAME, Counter::VERSION)
        .method(add(), move |args| {
            let (calls, total) = (calls.clone(), total.clone());
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let [n] = params::<1>(args)?;
                let n = param::<i64>(n)? as usize;
                arg((total.fetch_add(n, Ordering::SeqCst) + n) as i64)
            }
        })
        .method(divide(), move |args| {
            let calls = divisions.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let [a, b] = params::<2>(args)?;
                let (a, b): (i64, i64) = (param(a)?, param(b)?);
                if b == 0 {
                    return Err(IpcError::service("division by zero"));
                }
                arg(a / b)
            }
        })
}

fn server_peer() -> PeerAddress {
    PeerAddress::new("10.1.0.1:9000")
}

#[tokio::test]
async fn test_remote_failure_keeps_connection() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = Dispatcher::new();
    dispatcher.bind(ServiceBinding::new(counter_table(calls.clone())));

    let network = LocalNetwork::new();
    network.register(server_peer(), Arc::new(dispatcher));
    let factory = Arc::new(LocalTransportFactory::new(network));
    let pool = Arc::new(ConnectionPool::new(factory.clone()));
    let config = ConnectionConfig::default();

    let counter: Counter = get_proxy(&pool, 2, &server_peer(), &CallerIdentity::user("u"), &config)
        .await
        .unwrap();

    match counter.divide(1, 0).await.unwrap_err() {
        IpcError::RemoteExecution { class, message, .. } => {
            assert_eq!(class, "ServiceError");
            assert_eq!(message, "division by zero");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(counter.divide(9, 3).await.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(factory.created(), 1);

    stop_proxy(&counter);
    assert!(matches!(
        counter.add(1).await,
        Err(IpcError::ProxyClosed(_))
    ));
}

#[tokio::test]
async fn test_unknown_method_is_reported() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.bind(ServiceBinding::new(counter_table(Arc::new(AtomicUsize::new(0)))));
    let network = LocalNetwork::new();
    network.register(server_peer(), Arc::new(dispatcher));
    let pool = Arc::new(ConnectionPool::new(Arc::new(LocalTransportFactory::new(
        network,
    ))));

    let counter: Counter = get_proxy(
        &pool,
        2,
        &server_peer(),
        &CallerIdentity::user("u"),
        &ConnectionConfig::default(),
    )
    .await
    .unwrap();

    // Same name, different parameter types.
    let wrong = MethodSignature::new("add", vec![TypeDescriptor::Int], TypeDescriptor::Long);
    let err = counter
        .invoker()
        .call(&wrong, vec![Value::Int(1)])
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::NoSuchMethod(_)));
}

#[tokio::test]
async fn test_authorization_from_config() {
    let config = IpcConfig::from_toml_str(
        r#"
        [server]
        authorization = true
        default_acl = " "

        [server.acls]
        CounterProtocol = "alice ops"
        "#,
    )
    .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = config.server.dispatcher();
    dispatcher.bind(config.server.binding(counter_table(calls.clone())));
    let dispatcher = Arc::new(dispatcher);

    let network = LocalNetwork::new();
    network.register(server_peer(), dispatcher.clone());
    let pool = Arc::new(ConnectionPool::new(Arc::new(LocalTransportFactory::new(
        network,
    ))));
    let connection = config.client.connection_config();

    let alice: Counter = get_proxy(&pool, 2, &server_peer(), &CallerIdentity::user("alice"), &connection)
        .await
        .unwrap();
    assert_eq!(alice.add(5).await.unwrap(), 5);

    let operator = CallerIdentity::new("carol", vec!["ops".to_string()]);
    let carol: Counter = get_proxy(&pool, 2, &server_peer(), &operator, &connection)
        .await
        .unwrap();
    assert_eq!(carol.add(1).await.unwrap(), 6);

    let err = get_proxy::<Counter>(&pool, 2, &server_peer(), &CallerIdentity::user("bob"), &connection)
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::Authorization(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let snapshot = dispatcher.metrics().snapshot().await;
    assert_eq!(snapshot.authorization_failures, 1);
    // two version queries and two adds
    assert_eq!(snapshot.authorization_successes, 4);

    stop_proxy(&alice);
    stop_proxy(&carol);
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_proxies_share_one_pooled_client() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.bind(ServiceBinding::new(counter_table(Arc::new(AtomicUsize::new(0)))));
    let network = LocalNetwork::new();
    network.register(server_peer(), Arc::new(dispatcher));
    let factory = Arc::new(LocalTransportFactory::new(network));
    let pool = Arc::new(ConnectionPool::new(factory.clone()));
    let config = ConnectionConfig::default();
    let caller = CallerIdentity::user("u");

    let first: Counter = get_proxy(&pool, 2, &server_peer(), &caller, &config).await.unwrap();
    let second: Counter = get_proxy(&pool, 2, &server_peer(), &caller, &config).await.unwrap();
    assert_eq!(pool.ref_count(&config), 2);
    assert_eq!(factory.created(), 1);

    // A different configuration gets its own client.
    let other = ConnectionConfig::with_factory("secondary");
    let third: Counter = get_proxy(&pool, 2, &server_peer(), &caller, &other).await.unwrap();
    assert_eq!(pool.len(), 2);
    assert_eq!(factory.created(), 2);

    stop_proxy(&first);
    stop_proxy(&first);
    assert_eq!(pool.ref_count(&config), 1);
    assert_eq!(second.add(3).await.unwrap(), 3);

    drop(second);
    drop(third);
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_call_all_over_tcp() {
    let mut handles = Vec::new();
    for _ in 0..2 {
        let mut dispatcher = Dispatcher::new();
        dispatcher.bind(ServiceBinding::new(counter_table(Arc::new(AtomicUsize::new(0)))));
        let handle = RpcServer::new(Arc::new(dispatcher), 2)
            .start("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        handles.push(handle);
    }

    let pool = Arc::new(ConnectionPool::new(Arc::new(TcpTransportFactory)));
    let config = ConnectionConfig::with_factory("tcp");
    let calls = handles
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let target = PeerAddress::new(h.local_addr().to_string());
            (target, vec![Value::Long(10 * (i as i64 + 1)), Value::Long(5)])
        })
        .collect();

    let results = call_all(
        &pool,
        Counter::NAME,
        &divide(),
        calls,
        &CallerIdentity::user("u"),
        &config,
    )
    .await
    .unwrap();

    assert_eq!(results, vec![Ok(Value::Long(2)), Ok(Value::Long(4))]);
    assert!(pool.is_empty());
    for handle in &handles {
        handle.stop();
    }
}

#[tokio::test]
async fn test_factory_name_picks_the_transport() {
    let tcp_calls = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = Dispatcher::new();
    dispatcher.bind(ServiceBinding::new(counter_table(tcp_calls.clone())));
    let handle = RpcServer::new(Arc::new(dispatcher), 2)
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let target = PeerAddress::new(handle.local_addr().to_string());

    // The in-process network answers at the same address.
    let local_calls = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = Dispatcher::new();
    dispatcher.bind(ServiceBinding::new(counter_table(local_calls.clone())));
    let network = LocalNetwork::new();
    network.register(target.clone(), Arc::new(dispatcher));
    let local = Arc::new(LocalTransportFactory::new(network));
    let pool = Arc::new(ConnectionPool::tcp().with_factory("local", local.clone()));

    let over_tcp = IpcConfig::from_toml_str("[client]\nfactory = \"tcp\"\n").unwrap();
    let in_process = IpcConfig::from_toml_str("[client]\nfactory = \"local\"\n").unwrap();
    let caller = CallerIdentity::user("u");

    let remote: Counter = get_proxy(&pool, 2, &target, &caller, &over_tcp.client.connection_config())
        .await
        .unwrap();
    let nearby: Counter = get_proxy(&pool, 2, &target, &caller, &in_process.client.connection_config())
        .await
        .unwrap();
    assert_eq!(remote.add(2).await.unwrap(), 2);
    assert_eq!(nearby.add(5).await.unwrap(), 5);
    assert_eq!(nearby.add(1).await.unwrap(), 6);

    assert_eq!(tcp_calls.load(Ordering::SeqCst), 1);
    assert_eq!(local_calls.load(Ordering::SeqCst), 2);
    assert_eq!(local.created(), 1);
    assert_eq!(pool.len(), 2);

    stop_proxy(&remote);
    stop_proxy(&nearby);
    handle.stop();
}

#[tokio::test]
async fn test_slow_call_is_not_cut_off() {
    let nap = MethodSignature::new("nap", vec![], TypeDescriptor::Void);
    let table = DispatchTable::new(Counter::NAME, Counter::VERSION).method(nap.clone(), |_| async {
        // Longer than tarpc's default ten second deadline.
        tokio::time::sleep(std::time::Duration::from_secs(11)).await;
        arg(())
    });
    let mut dispatcher = Dispatcher::new();
    dispatcher.bind(ServiceBinding::new(table));
    let handle = RpcServer::new(Arc::new(dispatcher), 1)
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let target = PeerAddress::new(handle.local_addr().to_string());

    let pool = Arc::new(ConnectionPool::tcp());
    let counter: Counter = get_proxy(
        &pool,
        2,
        &target,
        &CallerIdentity::user("u"),
        &ConnectionConfig::with_factory("tcp"),
    )
    .await
    .unwrap();

    assert_eq!(counter.invoker().call(&nap, vec![]).await.unwrap(), Value::Null);
    handle.stop();
}
