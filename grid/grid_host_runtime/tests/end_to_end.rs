use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use deltagrid_host_runtime::config::parse_params_json;
use deltagrid_host_runtime::transport::{
    GRID_TO_SERVER_CAP, SERVER_TO_GRID_CAP, read_frame, write_frame,
};
use deltagrid_host_runtime::{
    Addressing, Backoff, ConnectionManager, HostBindings, HostConfig, MemoryView, Shutdown,
    StatusIcon, TableView, run,
};

const NAME_COLUMN: &str = "name,>Name,>{name},>,true,false,false";

#[derive(Default)]
struct SingleGrid {
    view: MemoryView,
    icons: Vec<StatusIcon>,
}

impl HostBindings for SingleGrid {
    type View = MemoryView;

    fn view_mut(&mut self, address: &str) -> Option<&mut MemoryView> {
        (address == "mainGrid").then_some(&mut self.view)
    }

    fn set_status(&mut self, icon: StatusIcon) {
        self.icons.push(icon);
    }
}

fn fixed_config() -> HostConfig {
    HostConfig {
        addressing: Addressing::Fixed("mainGrid".to_string()),
        params: parse_params_json(r#"{"user":"alice"}"#),
        ..HostConfig::default()
    }
}

fn drain(manager: &mut ConnectionManager<SingleGrid>) -> Vec<String> {
    manager
        .drain_outbox()
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn status_field<'a>(frame: &'a str, key: &str) -> Option<&'a str> {
    frame
        .strip_prefix("status:")?
        .split(',')
        .find_map(|pair| pair.strip_prefix(key)?.strip_prefix('='))
}

#[test]
fn schema_then_delta_renders_hello() {
    let mut manager = ConnectionManager::new(SingleGrid::default(), &fixed_config());
    manager.on_open();
    drain(&mut manager);

    manager.on_message(&format!("S{NAME_COLUMN}"));
    assert_eq!(
        drain(&mut manager),
        ["refresh:everything=true,message=schemaUpdate"]
    );

    manager.on_message("T0:0=<48656c6c6f");
    let frames = drain(&mut manager);
    assert_eq!(frames.len(), 1, "unexpected frames: {frames:?}");

    let status = &frames[0];
    assert_eq!(status_field(status, "rows"), Some("1"));
    assert_eq!(status_field(status, "delta"), Some("15"));
    assert_eq!(status_field(status, "change"), Some("1"));
    assert_eq!(status_field(status, "sequence"), Some("0"));
    assert_eq!(status_field(status, "method"), Some("updateTable"));
    assert_eq!(status_field(status, "address"), Some("mainGrid"));
    assert_eq!(status_field(status, "user"), Some("alice"));

    let view = &manager.bindings().view;
    assert_eq!(view.column_count(), 1);
    assert_eq!(view.cell(0, "name"), Some("Hello"));
    assert_eq!(
        manager.bindings().icons,
        [StatusIcon::Success, StatusIcon::Success]
    );
}

#[test]
fn repeated_schema_does_not_widen_again() {
    let mut manager = ConnectionManager::new(SingleGrid::default(), &fixed_config());

    manager.on_message(&format!("S{NAME_COLUMN}"));
    manager.on_message(&format!("S{NAME_COLUMN}"));

    assert_eq!(
        drain(&mut manager),
        ["refresh:everything=true,message=schemaUpdate"]
    );
    assert_eq!(manager.bindings().view.stats().columns_added, 1);
    assert_eq!(manager.table("mainGrid").map(|t| t.schema().len()), Some(1));
}

#[test]
fn truncating_view_requests_reconcile_refresh() {
    let bindings = SingleGrid {
        view: MemoryView::with_cell_limit(3),
        ..SingleGrid::default()
    };
    let mut manager = ConnectionManager::new(bindings, &fixed_config());
    manager.on_message(&format!("S{NAME_COLUMN}"));
    drain(&mut manager);

    manager.on_message("T4:0:0=<48656c6c6f|1:0=>ok");
    let frames = drain(&mut manager);

    assert_eq!(frames[0], "refresh:everything=true,message=reconcileFailure");
    assert_eq!(status_field(&frames[1], "sequence"), Some("4"));
    assert_eq!(status_field(&frames[1], "rows"), Some("2"));
    assert_eq!(frames.len(), 2);
    assert_eq!(manager.bindings().view.cell(0, "name"), Some("Hel"));
    assert_eq!(manager.bindings().view.cell(1, "name"), Some("ok"));
}

#[test]
fn undeclared_column_rejects_batch() {
    let mut manager = ConnectionManager::new(SingleGrid::default(), &fixed_config());
    manager.on_message(&format!("S{NAME_COLUMN}"));
    drain(&mut manager);

    manager.on_message("T0:0=>a|1:3=>b");
    let frames = drain(&mut manager);

    assert_eq!(frames[0], "refresh:everything=true,message=undeclaredColumn");
    assert_eq!(status_field(&frames[1], "change"), Some("0"));
    assert_eq!(status_field(&frames[1], "rows"), Some("0"));
    assert_eq!(manager.bindings().view.row_count(), 0);
}

#[test]
fn oversized_row_index_is_rejected() {
    let mut manager = ConnectionManager::new(SingleGrid::default(), &fixed_config());
    manager.on_message(&format!("S{NAME_COLUMN}"));
    drain(&mut manager);

    manager.on_message("T18446744073709551615:0=>x");
    let frames = drain(&mut manager);

    assert_eq!(frames[0], "refresh:everything=true,message=malformedFrame");
    assert_eq!(status_field(&frames[1], "rows"), Some("0"));
    assert_eq!(manager.bindings().view.row_count(), 0);
}

#[test]
fn highlight_reports_its_operation() {
    let mut manager = ConnectionManager::new(SingleGrid::default(), &fixed_config());
    manager.on_message(&format!("S{NAME_COLUMN}"));
    manager.on_message("T0:0=>bolt");
    drain(&mut manager);

    manager.on_message("H0:0=>color: red;");
    let frames = drain(&mut manager);

    assert_eq!(status_field(&frames[0], "method"), Some("highlightTable"));
    let row = &manager.bindings().view.rows()[0];
    assert_eq!(row.styles, ["color: red;"]);
    assert_eq!(row.fields["name"], "bolt");
}

#[test]
fn reconnect_schedule_follows_backoff() {
    let config = HostConfig {
        backoff: Backoff::new(Duration::from_millis(1000), Duration::from_millis(30_000)),
        ..fixed_config()
    };
    let mut manager = ConnectionManager::new(SingleGrid::default(), &config);

    let delays: Vec<u128> = (0..7).map(|_| manager.on_close().as_millis()).collect();
    assert_eq!(delays, [0, 1000, 3000, 7000, 15_000, 30_000, 30_000]);

    manager.on_open();
    assert_eq!(manager.on_close(), Duration::from_secs(1));
    assert!(!manager.state().is_open);
}

#[test]
fn run_applies_frames_from_server() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let endpoint = listener.local_addr().expect("local addr").to_string();
    let shutdown = Shutdown::new();
    let stopper = shutdown.clone();

    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().expect("accept");
        let mut received = Vec::new();

        let hello = read_frame(&mut socket, GRID_TO_SERVER_CAP).expect("read connect");
        received.push(String::from_utf8(hello).expect("utf8 connect"));

        let frames = [
            format!("Sprices|{NAME_COLUMN}"),
            "T9:prices|0:0=<48656c6c6f".to_string(),
        ];
        for frame in frames {
            write_frame(&mut socket, frame.as_bytes(), SERVER_TO_GRID_CAP).expect("write frame");
        }

        loop {
            let frame = read_frame(&mut socket, GRID_TO_SERVER_CAP).expect("read reply");
            let text = String::from_utf8(frame).expect("utf8 reply");
            let done = text.contains("method=updateTable");
            received.push(text);
            if done {
                break;
            }
        }

        stopper.trigger();
        received
    });

    let config = HostConfig {
        endpoint,
        route: "depth".to_string(),
        params: parse_params_json(r#"{"user":"bob"}"#),
        ..HostConfig::default()
    };

    #[derive(Default)]
    struct Prices {
        view: MemoryView,
    }

    impl HostBindings for Prices {
        type View = MemoryView;

        fn view_mut(&mut self, address: &str) -> Option<&mut MemoryView> {
            (address == "prices").then_some(&mut self.view)
        }
    }

    let bindings = run(Prices::default(), &config, &shutdown);
    let received = server.join().expect("server thread");

    assert_eq!(received[0], "connect:/depth?user=bob");
    assert_eq!(status_field(&received[1], "method"), Some("open"));
    assert_eq!(received[2], "refresh:everything=true,message=schemaUpdate");
    assert_eq!(status_field(&received[3], "sequence"), Some("9"));
    assert_eq!(status_field(&received[3], "address"), Some("prices"));
    assert_eq!(status_field(&received[3], "user"), Some("bob"));
    assert_eq!(bindings.view.cell(0, "name"), Some("Hello"));
}
