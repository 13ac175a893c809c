//! End-to-end inspection of an obfuscated heap.
//!
//! The heap is laid out by hand in a [`MemorySnapshot`] the way the runtime lays out objects:
//! a type handle followed by pointer-sized field slots. Type and field names are the
//! obfuscated ones; a renaming map written to a temporary file restores the originals.

use std::{io::Write, sync::Arc};

use heapscope::{prelude::*, visualizers::SequenceView};

const POINTER: u64 = 8;

const MAP: &str = r#"<dotfuscatorMap version="1.1"><mapping>
  <module>
    <name>Shop.dll</name>
    <type>
      <name>Shop.Customer</name>
      <newname>System.Obfuscation.A</newname>
      <fieldlist>
        <field><name>name</name><newname>a</newname><signature>string</signature></field>
        <field><name>orders</name><newname>b</newname><signature>object</signature></field>
      </fieldlist>
      <methodlist>
        <method><name>PlaceOrder</name><newname>a</newname><signature>Shop.Order(int32)</signature></method>
      </methodlist>
    </type>
    <type>
      <name>Shop.Order</name>
      <newname>System.Obfuscation.B</newname>
      <fieldlist>
        <field><name>quantity</name><newname>a</newname><signature>int32</signature></field>
        <field><name>buyer</name><newname>b</newname><signature>Shop.Customer</signature></field>
      </fieldlist>
    </type>
  </module>
</mapping></dotfuscatorMap>"#;

struct Shop {
    heap: MemorySnapshot,
    customer: u64,
    orders: Vec<u64>,
    list: u64,
}

fn reference_type(id: u64, name: &str, fields: &[(&str, &RuntimeTypeRc)]) -> RuntimeTypeRc {
    let ty = Arc::new(
        RuntimeType::new(id, name)
            .with_module(r"C:\shop\bin\Shop.dll")
            .with_flags(TypeFlags::OBJECT_REFERENCE)
            .with_base_size(8 + 8 * fields.len()),
    );
    for (index, (field, field_type)) in fields.iter().enumerate() {
        ty.add_field(*field, field_type, 8 * index);
    }
    ty
}

fn shop() -> Result<Shop> {
    let int32 = Arc::new(RuntimeType::primitive(1, ElementKind::I4).with_base_size(12));
    let string = Arc::new(
        RuntimeType::new(2, "System.String")
            .with_flags(TypeFlags::STRING | TypeFlags::OBJECT_REFERENCE | TypeFlags::SEALED)
            .with_base_size(14),
    );
    let object =
        Arc::new(RuntimeType::new(3, "System.Object").with_flags(TypeFlags::OBJECT_REFERENCE));
    let objects = Arc::new(
        RuntimeType::new(4, "System.Object[]")
            .with_flags(TypeFlags::ARRAY | TypeFlags::OBJECT_REFERENCE | TypeFlags::SEALED)
            .with_component_size(8),
    );
    objects.set_component(&object);

    let customer_ty = reference_type(0x10, "System.Obfuscation.A", &[("a", &string), ("b", &object)]);
    let order_ty = reference_type(0x11, "System.Obfuscation.B", &[("a", &int32), ("b", &customer_ty)]);
    let list_ty = Arc::new(
        RuntimeType::new(0x12, "System.Collections.Generic.List<System.Obfuscation.B>")
            .with_flags(TypeFlags::OBJECT_REFERENCE)
            .with_base_size(24),
    );
    list_ty.add_field("_items", &objects, 0);
    list_ty.add_field("_size", &int32, 8);

    let mut heap = MemorySnapshot::new(POINTER as usize);
    for ty in [&int32, &string, &object, &objects, &customer_ty, &order_ty, &list_ty] {
        heap.register_type(ty);
    }

    let name = heap.alloc_object(&string, 8 + 4 + 2 * 4)?;
    heap.write(name + POINTER, &3_u32.to_le_bytes())?;
    let units: Vec<u8> = "Ada".encode_utf16().flat_map(u16::to_le_bytes).collect();
    heap.write(name + POINTER + 4, &units)?;

    let customer = heap.alloc_object(&customer_ty, customer_ty.base_size)?;
    heap.write_pointer(customer + POINTER, name)?;

    let mut orders = Vec::new();
    for quantity in [2_i32, 5] {
        let order = heap.alloc_object(&order_ty, order_ty.base_size)?;
        heap.write(order + POINTER, &quantity.to_le_bytes())?;
        heap.write_pointer(order + POINTER + 8, customer)?;
        orders.push(order);
    }

    let items = heap.alloc_object(&objects, 16 + 8 * 4)?;
    heap.write(items + POINTER, &4_u32.to_le_bytes())?;
    for (index, order) in orders.iter().enumerate() {
        heap.write_pointer(items + 16 + 8 * index as u64, *order)?;
    }

    let list = heap.alloc_object(&list_ty, list_ty.base_size)?;
    heap.write_pointer(list + POINTER, items)?;
    heap.write(list + POINTER + 8, &2_i32.to_le_bytes())?;
    heap.write_pointer(customer + POINTER + 8, list)?;

    Ok(Shop {
        heap,
        customer,
        orders,
        list,
    })
}

fn session_with_map(shop: &Shop) -> Result<HeapSession> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(MAP.as_bytes())?;

    let mut session = HeapSession::new(shop.heap.clone());
    session.load_renaming_map(file.path())?;
    Ok(session)
}

#[test]
fn navigate_by_original_names() -> Result<()> {
    let shop = shop()?;
    let session = session_with_map(&shop)?;

    let customers = session.objects_of_type("Shop.Customer")?;
    assert_eq!(customers.len(), 1);
    let customer = &customers[0];
    assert_eq!(customer.address(), shop.customer);
    assert_eq!(customer.field("name")?.to::<String>()?, "Ada");

    let orders = customer.field("orders")?;
    assert_eq!(orders.type_name(), "System.Collections.Generic.List<Shop.Order>");

    let quantities: Vec<i32> = session
        .objects_of_type("shop.ord*")?
        .iter()
        .map(|order| order.field("quantity")?.to())
        .collect::<Result<_>>()?;
    assert_eq!(quantities, [2, 5]);
    Ok(())
}

#[test]
fn renaming_is_optional() -> Result<()> {
    let shop = shop()?;
    let session = HeapSession::new(shop.heap.clone());

    let customer = session.object(shop.customer);
    assert_eq!(customer.type_name(), "System.Obfuscation.A");
    assert_eq!(customer.field("a")?.to::<String>()?, "Ada");
    assert!(customer.field("name").is_err());
    assert!(session.objects_of_type("Shop.Customer")?.is_empty());
    Ok(())
}

#[test]
fn polymorphic_fields_and_rendering() -> Result<()> {
    let shop = shop()?;
    let session = session_with_map(&shop)?;
    let customer = session.object(shop.customer);

    // Declared as System.Object, resolved to the list instance
    let orders = customer.field("orders")?;
    assert_eq!(orders.address(), shop.list);

    let detailed = session
        .object(shop.orders[1])
        .to_detailed_string(&DetailOptions::default())?;
    assert_eq!(
        detailed,
        format!(
            "{{Shop.Order (0x{:X})}}\n  quantity: 5\n  buyer: {{Shop.Customer (0x{:X})}}",
            shop.orders[1], shop.customer
        )
    );
    Ok(())
}

#[test]
fn list_visualizer_through_the_session() -> Result<()> {
    let shop = shop()?;
    let session = session_with_map(&shop)?;

    let Some(Visualization::Sequence(SequenceView { count, items })) =
        session.object(shop.list).visualize()
    else {
        panic!("expected the list visualizer to apply");
    };
    assert_eq!(count, 2);
    let addresses: Vec<u64> = items.iter().map(DynamicObject::address).collect();
    assert_eq!(addresses, shop.orders);
    Ok(())
}

#[test]
fn reverse_references() -> Result<()> {
    let shop = shop()?;
    let mut session = session_with_map(&shop)?;

    let scanned: Vec<u64> = session
        .object(shop.customer)
        .referenced_by()?
        .iter()
        .map(DynamicObject::address)
        .collect();

    session.build_reference_index()?;
    let mut indexed: Vec<u64> = session
        .object(shop.customer)
        .referenced_by()?
        .iter()
        .map(DynamicObject::address)
        .collect();
    indexed.sort_unstable();

    assert_eq!(scanned, shop.orders);
    assert_eq!(indexed, shop.orders);
    Ok(())
}

#[test]
fn stack_traces() -> Result<()> {
    let shop = shop()?;
    let session = session_with_map(&shop)?;

    let trace = "   at System.Obfuscation.A.a(Int32 quantity)\n   at Shop.Program.Main()";
    assert_eq!(
        session.deobfuscate_stack(trace),
        "   at Shop.Customer.PlaceOrder(System.Int32)\n   at Shop.Program.Main()"
    );
    assert_eq!(session.obfuscate_type("Shop.Order[]"), "System.Obfuscation.B[]");
    Ok(())
}
