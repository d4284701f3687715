//! ESC/POS receipt printing over a raw TCP socket (port 9100 printers).

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use super::{FanoutError, PrintOutcome, Receipt, ReceiptPrinter};
use crate::domain::value_objects::format_rupiah;
use crate::settings::PrinterSettings;
use crate::store::SettingsStore;

const LINE_WIDTH: usize = 32;

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;

/// Minimal ESC/POS command buffer.
#[derive(Default)]
struct EscPos {
    buf: Vec<u8>,
}

#[derive(Clone, Copy)]
enum Align {
    Left = 0,
    Center = 1,
}

impl EscPos {
    fn init() -> Self {
        let mut p = Self::default();
        p.buf.extend_from_slice(&[ESC, b'@']);
        p
    }

    fn align(&mut self, align: Align) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'a', align as u8]);
        self
    }

    fn bold(&mut self, on: bool) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'E', on as u8]);
        self
    }

    fn text(&mut self, s: &str) -> &mut Self {
        self.buf.extend(s.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' }));
        self.buf.push(b'\n');
        self
    }

    fn rule(&mut self) -> &mut Self {
        self.text(&"-".repeat(LINE_WIDTH))
    }

    /// Left text and right-aligned amount on one line, left truncated to fit.
    fn columns(&mut self, left: &str, right: &str) -> &mut Self {
        let room = LINE_WIDTH.saturating_sub(right.len() + 1);
        let left: String = left.chars().take(room).collect();
        let pad = LINE_WIDTH.saturating_sub(left.chars().count() + right.len());
        self.text(&format!("{left}{}{right}", " ".repeat(pad)))
    }

    fn cut(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[b'\n', b'\n', b'\n', GS, b'V', 0]);
        self
    }

    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Renders a receipt into ESC/POS bytes.
pub fn render(receipt: &Receipt) -> Vec<u8> {
    let mut p = EscPos::init();
    p.align(Align::Center).bold(true).text(&receipt.shop.name).bold(false);
    p.text(&receipt.shop.address).text(&receipt.shop.phone).rule();
    p.align(Align::Left)
        .text(&format!("Order : {}", receipt.order_id))
        .text(&format!("Tanggal: {}", receipt.paid_at.format("%d/%m/%Y %H:%M")))
        .rule();
    for item in &receipt.items {
        p.columns(&format!("{} x{}", item.name, item.qty), &format_rupiah(item.subtotal()));
    }
    p.rule().bold(true).columns("TOTAL", &format_rupiah(receipt.gross_amount)).bold(false);
    p.text(&format!("Pembayaran: {}", receipt.payment_type.as_deref().unwrap_or("QRIS")));
    if let Some(tx) = &receipt.transaction_id {
        p.text(&format!("TX: {tx}"));
    }
    p.rule().align(Align::Center).text("Terima kasih").text("Simpan struk ini sebagai bukti.").cut();
    p.finish()
}

/// Network printer whose address is read from settings on every print.
pub struct EscPosPrinter {
    settings: Arc<dyn SettingsStore>,
}

impl EscPosPrinter {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ReceiptPrinter for EscPosPrinter {
    #[instrument(skip_all, fields(order_id = %receipt.order_id))]
    async fn print(&self, receipt: &Receipt) -> Result<PrintOutcome, FanoutError> {
        let settings = PrinterSettings::load(self.settings.as_ref())
            .await
            .map_err(|e| FanoutError::Settings(e.to_string()))?;
        let Some((host, port)) = settings.target() else {
            debug!("printing disabled");
            return Ok(PrintOutcome::Disabled);
        };

        let mut stream = TcpStream::connect((host, port)).await?;
        stream.write_all(&render(receipt)).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        debug!(%host, port, "receipt printed");
        Ok(PrintOutcome::Printed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::ShopInfo;
    use crate::settings::{PRINTER_ENABLED, PRINTER_HOST, PRINTER_PORT};
    use crate::store::MemorySettingsStore;
    use crate::OrderLine;
    use chrono::TimeZone;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn receipt() -> Receipt {
        Receipt {
            shop: ShopInfo { name: "TOKO CONTOH".into(), address: "Jl. Mawar No.1".into(), phone: "0812-0000-0000".into() },
            order_id: "ORD-ABC".into(),
            gross_amount: 25_000,
            items: vec![
                OrderLine { product_id: 1, name: "Kopi Susu".into(), qty: 2, price: 10_000 },
                OrderLine { product_id: 2, name: "Teh Manis Dingin Ukuran Jumbo Sekali".into(), qty: 1, price: 5_000 },
            ],
            payment_type: Some("qris".into()),
            transaction_id: Some("tx-1".into()),
            paid_at: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_render_layout() {
        let bytes = render(&receipt());
        let text = String::from_utf8_lossy(&bytes);
        assert!(bytes.starts_with(&[ESC, b'@']));
        assert!(bytes.ends_with(&[GS, b'V', 0]));
        assert!(text.contains("Order : ORD-ABC"));
        assert!(text.contains("Tanggal: 01/05/2024 09:30"));
        assert!(text.contains(&format!("Kopi Susu x2{}Rp 20.000", " ".repeat(32 - 12 - 9))));
        assert!(text.contains("TX: tx-1"));
    }

    #[test]
    fn test_columns_truncate_long_names() {
        let mut p = EscPos::default();
        p.columns("Teh Manis Dingin Ukuran Jumbo Sekali x1", "Rp 5.000");
        let line = String::from_utf8(p.finish()).unwrap();
        assert_eq!(line, "Teh Manis Dingin Ukuran Rp 5.000\n");
        assert_eq!(line.trim_end().len(), LINE_WIDTH);
    }

    #[tokio::test]
    async fn test_disabled_printer_is_noop() {
        let settings = MemorySettingsStore::new();
        settings.set(PRINTER_HOST, "127.0.0.1").await;
        let printer = EscPosPrinter::new(Arc::new(settings));
        assert_eq!(printer.print(&receipt()).await.unwrap(), PrintOutcome::Disabled);
    }

    #[tokio::test]
    async fn test_prints_to_configured_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let settings = MemorySettingsStore::new();
        settings.set(PRINTER_ENABLED, "true").await;
        settings.set(PRINTER_HOST, "127.0.0.1").await;
        settings.set(PRINTER_PORT, port.to_string()).await;
        let printer = EscPosPrinter::new(Arc::new(settings));

        assert_eq!(printer.print(&receipt()).await.unwrap(), PrintOutcome::Printed);
        assert_eq!(server.await.unwrap(), render(&receipt()));
    }

    #[tokio::test]
    async fn test_unreachable_printer_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let settings = MemorySettingsStore::new();
        settings.set(PRINTER_ENABLED, "true").await;
        settings.set(PRINTER_HOST, "127.0.0.1").await;
        settings.set(PRINTER_PORT, port.to_string()).await;
        let printer = EscPosPrinter::new(Arc::new(settings));
        assert!(matches!(printer.print(&receipt()).await, Err(FanoutError::Printer(_))));
    }
}
