use portage_core::StackStatus;
use portage_driver::types::{CreatePortRequest, CreateStackRequest};
use portage_driver::{
    Gateway, GatewayAgent, NetworkDriver, StackEngine, StaticCloud, VgwAllocator,
};
use serde_json::json;

#[tokio::test]
async fn stacks_progress_then_complete_after_scripted_polls() {
    let cloud = StaticCloud::new();
    cloud.script_stack_poll_delay(2);

    let template = json!({
        "heat_template_version": "2013-05-23",
        "resources": {"server_0": {"type": "OS::Nova::Server", "properties": {}}}
    })
    .to_string();
    let stack = cloud
        .create_stack(CreateStackRequest {
            stack_name: "stack-test".to_string(),
            template,
            files: Default::default(),
            disable_rollback: true,
        })
        .await
        .unwrap();

    assert_eq!(stack.stack_status, StackStatus::CreateInProgress);
    assert_eq!(
        cloud.get_stack(&stack.id).await.unwrap().stack_status,
        StackStatus::CreateInProgress
    );
    assert_eq!(
        cloud.get_stack(&stack.id).await.unwrap().stack_status,
        StackStatus::CreateInProgress
    );
    assert_eq!(
        cloud.get_stack(&stack.id).await.unwrap().stack_status,
        StackStatus::CreateComplete
    );

    let resource = cloud.get_resource(&stack.id, "server_0").await.unwrap();
    assert_eq!(resource.physical_resource_id, format!("{}:server_0", stack.id));

    let events = cloud.events_list(&stack.id).await.unwrap();
    assert_eq!(events[0].resource_status, "CREATE_COMPLETE");
}

#[tokio::test]
async fn scripted_port_conflicts_then_success() {
    let cloud = StaticCloud::new();
    cloud.script_port_conflicts(2);

    let request = CreatePortRequest {
        network_id: "net-1".to_string(),
        mac_address: Some("fa:16:3e:aa:bb:cc".to_string()),
        fixed_ips: vec![],
        security_group_ids: vec![],
        admin_state_up: true,
    };

    assert!(cloud
        .create_port(request.clone())
        .await
        .unwrap_err()
        .is_address_conflict());
    assert!(cloud
        .create_port(request.clone())
        .await
        .unwrap_err()
        .is_address_conflict());
    let port = cloud.create_port(request).await.unwrap();
    assert_eq!(port.mac_address, "fa:16:3e:aa:bb:cc");
}

#[tokio::test]
async fn gateway_agent_reports_devices_and_transfers() {
    let cloud = StaticCloud::new();
    cloud.add_gateway_disk("vda");
    cloud.set_disk_format("vda", "ext4");
    cloud.script_transfer_poll_delay(1);

    assert_eq!(cloud.list_disks().await.unwrap(), vec!["vda"]);
    assert_eq!(
        cloud.get_disk_format("vda").await.unwrap().as_deref(),
        Some("ext4")
    );

    let task = cloud
        .clone_volume(portage_driver::CloneVolumeRequest {
            src_dev_name: "vda".to_string(),
            des_dev_name: "vdb".to_string(),
            src_dev_format: "ext4".to_string(),
            src_mount_point: "/opt/vol".to_string(),
            src_gw_url: "192.0.2.1:9998".to_string(),
            des_gw_url: "192.0.2.2:9998".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(
        cloud.get_data_trans_status(&task).await.unwrap(),
        portage_driver::TransferStatus::InProgress
    );
    assert_eq!(
        cloud.get_data_trans_status(&task).await.unwrap(),
        portage_driver::TransferStatus::Finished
    );
}

#[test]
fn vgw_allocation_round_robins_within_a_zone() {
    let allocator = VgwAllocator::new();
    allocator.register(
        "az-src",
        Gateway {
            id: "gw-1".to_string(),
            ip: "192.0.2.1".to_string(),
        },
    );
    allocator.register(
        "az-src",
        Gateway {
            id: "gw-2".to_string(),
            ip: "192.0.2.2".to_string(),
        },
    );

    assert_eq!(allocator.next("az-src").unwrap().id, "gw-1");
    assert_eq!(allocator.next("az-src").unwrap().id, "gw-2");
    assert_eq!(allocator.next("az-src").unwrap().id, "gw-1");
    assert!(allocator.next("az-empty").is_err());
}
