use shopsim::{
    ArrivalProcess, DblExp, FlowTimeCollector, JobSource, Operation, Route, SetupMatrix, Shop,
    ShopExperiment, WorkStation,
};
use shopsim::experiment::Experiment;
use shopsim::rules::{Fcfs, Spt};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shopsim=info".into()),
        )
        .init();

    let mut exp = ShopExperiment::new(two_station_flow_shop())
        .with_listener(Box::new(FlowTimeCollector::new()))
        .with_sim_length(10_000.0)
        .with_warm_up(1_000.0)
        .with_seed(42);

    let rm = exp.run().expect("scenario failed");

    println!("simTime            = {:.1}", rm.num("simTime").unwrap());
    println!("jobs finished      = {}", rm.num("jobsFinished").unwrap());
    println!("mean flow time     = {:.2}", rm.num("flowMean").unwrap());
    println!("W1 utilization     = {:.3}", rm.num("ws.W1.utilization").unwrap());
    println!("W2 utilization     = {:.3}", rm.num("ws.W2.utilization").unwrap());
}

fn two_station_flow_shop() -> Shop {
    let mut shop = Shop::new();

    let w1 = shop.add_station(WorkStation::new("W1", 2), Box::new(Fcfs));
    let setups = SetupMatrix::new().with_default(0.3);
    let w2 = shop.add_station(
        WorkStation::new("W2", 1).with_setup_matrix(setups),
        Box::new(Spt),
    );

    let route_a = Route::new(vec![
        Operation::new(w1, 1.4).with_setup_family("A"),
        Operation::new(w2, 0.8).with_setup_family("A"),
    ]);
    let route_b = Route::new(vec![
        Operation::new(w1, 2.1).with_setup_family("B"),
        Operation::new(w2, 0.5).with_setup_family("B"),
    ]);

    shop.add_source(JobSource::new(
        ArrivalProcess::InterArrival(Box::new(DblExp::new(1.2, 0))),
        vec![route_a, route_b],
    ));

    shop
}
