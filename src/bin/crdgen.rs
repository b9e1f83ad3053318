use crdb_dbaas_operator::resources::crdbdbaasconnections::CrdbDBaaSConnection;
use crdb_dbaas_operator::resources::crdbdbaasinventories::CrdbDBaaSInventory;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&CrdbDBaaSInventory::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&CrdbDBaaSConnection::crd())?);
    Ok(())
}
