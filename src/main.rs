//! `cosim` binary: reads a scenario file, connects to each simulator,
//! creates their entities, wires the dataflow graph, then runs.

use std::process;

use tokio::net::TcpStream;

use cosim::cli::{self, CliArgs};
use cosim::config::ScenarioFile;
use cosim::error::{CoSimError, ScenarioError, TransportError};
use cosim::graph::{EdgeModifiers, ScenarioGraph};
use cosim::ids::{EntityRef, SimulatorId};
use cosim::proxy::SimulatorProxy;
use cosim::run::RunController;
use cosim::scheduler::RunConfig;
use cosim::time::T;

#[tokio::main]
async fn main() {
    cosim::telemetry::init();

    let args = match cli::parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("cosim: {e}");
            cli::print_help();
            process::exit(2);
        }
    };

    let text = match std::fs::read_to_string(&args.scenario) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("cosim: failed to read {}: {e}", args.scenario);
            process::exit(2);
        }
    };
    let file = match ScenarioFile::parse(&text) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("cosim: {e}");
            process::exit(2);
        }
    };
    if let Err(errors) = file.validate() {
        for e in &errors {
            eprintln!("cosim: invalid scenario: {e}");
        }
        process::exit(2);
    }

    if let Err(e) = run(args, file).await {
        tracing::error!(error = %e, "run failed");
        eprintln!("cosim: {e}");
        process::exit(1);
    }
}

async fn run(args: CliArgs, file: ScenarioFile) -> Result<(), CoSimError> {
    let mut graph = ScenarioGraph::new();
    let mut proxies = Vec::new();

    for (sim_id, spec) in &file.simulators {
        let id = SimulatorId::new(sim_id.clone()).map_err(ScenarioError::from)?;
        tracing::info!(sim = %id, addr = %spec.connect, "connecting to simulator");
        let stream = TcpStream::connect(&spec.connect)
            .await
            .map_err(|e| TransportError::Connect {
                sim: sim_id.clone(),
                source: e,
            })?;
        let mut proxy = SimulatorProxy::init(
            stream,
            id.clone(),
            file.time_resolution,
            spec.init_kwargs.clone(),
        )
        .await?;

        graph.register_simulator(id.clone(), proxy.meta.clone())?;
        for entity_spec in spec.entities.values() {
            let eids = proxy
                .create(&entity_spec.model, entity_spec.num, entity_spec.params.clone())
                .await?;
            graph.register_entities(&id, &entity_spec.model, eids)?;
        }
        proxies.push(proxy);
    }

    for conn in &file.connections {
        let src = EntityRef::parse(&conn.src).map_err(ScenarioError::from)?;
        let dst = EntityRef::parse(&conn.dst).map_err(ScenarioError::from)?;
        let attrs: Vec<(&str, &str)> = conn
            .attrs
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect();
        graph.connect(
            src,
            dst,
            &attrs,
            EdgeModifiers {
                time_shift: conn.time_shift,
                weak: conn.weak,
                initial_data: conn.initial_data.clone(),
            },
        )?;
    }

    for proxy in &mut proxies {
        proxy.setup_done().await?;
    }

    let sealed = RunController::new(graph, proxies).seal()?;

    let config = RunConfig {
        until: T::new(args.until.or(file.until).unwrap_or(0)),
        time_resolution: file.time_resolution,
        rt_factor: args.rt_factor.or(file.rt_factor),
        rt_strict: args.rt_strict.unwrap_or(file.rt_strict),
        max_loop_iterations: args
            .max_loop_iterations
            .unwrap_or(file.max_loop_iterations),
        lazy_stepping: args.lazy_stepping.unwrap_or(file.lazy_stepping),
        stop_timeout: std::time::Duration::from_secs_f64(
            args.stop_timeout_secs.unwrap_or(file.stop_timeout_secs),
        ),
    };

    #[cfg(feature = "api")]
    {
        if let Some(addr) = args.api_addr.clone() {
            let router = cosim::api::router(sealed.world());
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| TransportError::Connect {
                    sim: format!("api@{addr}"),
                    source: e,
                })?;
            tracing::info!(%addr, "serving read-only API");
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router).await {
                    tracing::error!(error = %e, "read-only API server stopped");
                }
            });
        }
    }

    sealed.run(config).await
}
